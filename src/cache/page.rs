use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// What may happen for a requested page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// Already cached; no request needed.
    Cached,
    /// Not cached and its predecessor is present and non-empty.
    Fetchable,
    /// Pagination is exhausted or the predecessor is missing or empty.
    Blocked,
}

#[derive(Debug, Default)]
struct Pages {
    pages: BTreeMap<u32, Vec<String>>,
    exhausted: bool,
}

/// Cursor-paginated id lists keyed by query. Pages start at 1.
///
/// Page `p` is only accepted when page `p - 1` is cached and non-empty;
/// an empty page exhausts the key until the cache is cleared.
#[derive(Debug)]
pub struct PageCache<K> {
    keys: HashMap<K, Pages>,
}

impl<K> Default for PageCache<K> {
    fn default() -> Self {
        Self {
            keys: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> PageCache<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, key: &K, page: u32) -> PageState {
        if page == 0 {
            return PageState::Blocked;
        }

        let Some(entry) = self.keys.get(key) else {
            return if page == 1 {
                PageState::Fetchable
            } else {
                PageState::Blocked
            };
        };

        if entry.pages.contains_key(&page) {
            return PageState::Cached;
        }
        if entry.exhausted {
            return PageState::Blocked;
        }
        if page == 1 {
            return PageState::Fetchable;
        }

        match entry.pages.get(&(page - 1)) {
            Some(ids) if !ids.is_empty() => PageState::Fetchable,
            _ => PageState::Blocked,
        }
    }

    /// Stores a fetched page. Returns `false` if the page no longer
    /// satisfies the ordering precondition and was dropped.
    pub fn insert(&mut self, key: K, page: u32, ids: Vec<String>) -> bool {
        if self.check(&key, page) == PageState::Blocked {
            return false;
        }

        let entry = self.keys.entry(key).or_default();
        if ids.is_empty() {
            entry.exhausted = true;
        }
        entry.pages.insert(page, ids);
        true
    }

    pub fn page(&self, key: &K, page: u32) -> Option<&[String]> {
        self.keys
            .get(key)
            .and_then(|entry| entry.pages.get(&page))
            .map(Vec::as_slice)
    }

    pub fn is_exhausted(&self, key: &K) -> bool {
        self.keys.get(key).is_some_and(|entry| entry.exhausted)
    }

    pub fn cached_pages(&self, key: &K) -> Vec<u32> {
        self.keys
            .get(key)
            .map(|entry| entry.pages.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("id-{}", i)).collect()
    }

    #[test]
    fn test_first_page_fetchable() {
        let cache: PageCache<String> = PageCache::new();
        assert_eq!(cache.check(&"k".into(), 1), PageState::Fetchable);
        assert_eq!(cache.check(&"k".into(), 2), PageState::Blocked);
        assert_eq!(cache.check(&"k".into(), 0), PageState::Blocked);
    }

    #[test]
    fn test_pages_advance_in_order() {
        let mut cache = PageCache::new();
        let key = "k".to_string();

        assert!(cache.insert(key.clone(), 1, ids(3)));
        assert_eq!(cache.check(&key, 1), PageState::Cached);
        assert_eq!(cache.check(&key, 2), PageState::Fetchable);
        assert_eq!(cache.check(&key, 3), PageState::Blocked);

        // Out-of-order insert is rejected
        assert!(!cache.insert(key.clone(), 3, ids(3)));
        assert_eq!(cache.cached_pages(&key), vec![1]);
    }

    #[test]
    fn test_empty_page_exhausts_key() {
        let mut cache = PageCache::new();
        let key = "k".to_string();

        cache.insert(key.clone(), 1, ids(2));
        cache.insert(key.clone(), 2, Vec::new());

        assert!(cache.is_exhausted(&key));
        assert_eq!(cache.check(&key, 2), PageState::Cached);
        assert_eq!(cache.check(&key, 3), PageState::Blocked);
        assert_eq!(cache.page(&key, 2), Some(&[][..]));
    }

    #[test]
    fn test_keys_are_independent() {
        let mut cache = PageCache::new();
        cache.insert("a".to_string(), 1, Vec::new());

        assert!(cache.is_exhausted(&"a".to_string()));
        assert!(!cache.is_exhausted(&"b".to_string()));
        assert_eq!(cache.check(&"b".to_string(), 1), PageState::Fetchable);
    }

    #[test]
    fn test_clear_resets_exhaustion() {
        let mut cache = PageCache::new();
        let key = "k".to_string();
        cache.insert(key.clone(), 1, Vec::new());

        cache.clear();
        assert!(!cache.is_exhausted(&key));
        assert_eq!(cache.check(&key, 1), PageState::Fetchable);
    }
}
