use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::normalize_source_id;

/// Identity shared by every form of an item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey {
    pub source_id: String,
    pub item_id: String,
}

impl ItemKey {
    pub fn new(source_id: &str, item_id: impl Into<String>) -> Self {
        Self {
            source_id: normalize_source_id(source_id),
            item_id: item_id.into(),
        }
    }
}

impl std::fmt::Display for ItemKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.source_id, self.item_id)
    }
}

/// Listing form of an item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub id: String,
    pub title: String,
    pub latest_label: Option<String>,
    pub is_ended: bool,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    pub title: String,
}

/// Full form of an item, strictly richer than [`Summary`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Detail {
    pub summary: Summary,
    pub description: Option<String>,
    pub genres: Vec<String>,
    pub authors: Vec<String>,
    pub serial_chapters: Vec<Chapter>,
    pub extra_chapters: Vec<Chapter>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Item {
    Summary(Summary),
    Detail(Detail),
}

impl Item {
    pub fn id(&self) -> &str {
        &self.summary().id
    }

    pub fn summary(&self) -> &Summary {
        match self {
            Item::Summary(summary) => summary,
            Item::Detail(detail) => &detail.summary,
        }
    }

    pub fn is_detail(&self) -> bool {
        matches!(self, Item::Detail(_))
    }

    pub fn title(&self) -> &str {
        &self.summary().title
    }

    /// Combine a cached slot with a freshly fetched one.
    ///
    /// A Detail is never replaced by a Summary; the Summary's listing fields
    /// are copied onto it instead.
    pub fn upgrade(self, incoming: Item) -> Item {
        match (self, incoming) {
            (Item::Detail(mut detail), Item::Summary(summary)) => {
                detail.summary = summary;
                Item::Detail(detail)
            }
            (_, incoming) => incoming,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(id: &str, label: &str) -> Summary {
        Summary {
            id: id.into(),
            title: format!("Title {}", id),
            latest_label: Some(label.into()),
            is_ended: false,
            thumbnail: None,
        }
    }

    #[test]
    fn test_key_normalizes_source() {
        let key = ItemKey::new("MangaDex", "abc");
        assert_eq!(key.source_id, "mangadex");
        assert_eq!(key.to_string(), "mangadex/abc");
    }

    #[test]
    fn test_summary_upgrades_to_detail() {
        let cached = Item::Summary(summary("1", "Ch. 1"));
        let detail = Detail {
            summary: summary("1", "Ch. 2"),
            description: Some("desc".into()),
            ..Default::default()
        };

        let merged = cached.upgrade(Item::Detail(detail.clone()));
        assert_eq!(merged, Item::Detail(detail));
    }

    #[test]
    fn test_detail_never_downgrades() {
        let detail = Detail {
            summary: summary("1", "Ch. 1"),
            genres: vec!["Action".into()],
            ..Default::default()
        };
        let cached = Item::Detail(detail);

        let merged = cached.upgrade(Item::Summary(summary("1", "Ch. 5")));
        assert!(merged.is_detail());
        assert_eq!(merged.summary().latest_label.as_deref(), Some("Ch. 5"));
        match merged {
            Item::Detail(d) => assert_eq!(d.genres, vec!["Action".to_string()]),
            Item::Summary(_) => panic!("detail was downgraded"),
        }
    }

    #[test]
    fn test_summary_replaces_summary() {
        let cached = Item::Summary(summary("1", "Ch. 1"));
        let merged = cached.upgrade(Item::Summary(summary("1", "Ch. 2")));
        assert_eq!(merged.summary().latest_label.as_deref(), Some("Ch. 2"));
    }
}
