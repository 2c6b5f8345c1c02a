use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Item, ItemKey};

/// A saved item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionRecord {
    pub key: ItemKey,
    pub title: String,
    pub is_ended: bool,
    pub latest_label: Option<String>,
    pub thumbnail: Option<String>,
}

impl CollectionRecord {
    pub fn from_item(source_id: &str, item: &Item) -> Self {
        let summary = item.summary();
        Self {
            key: ItemKey::new(source_id, summary.id.clone()),
            title: summary.title.clone(),
            is_ended: summary.is_ended,
            latest_label: summary.latest_label.clone(),
            thumbnail: summary.thumbnail.clone(),
        }
    }
}

/// Per-item reading progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub key: ItemKey,
    pub title: String,
    pub thumbnail: Option<String>,
    pub latest_label: Option<String>,
    pub last_read_chapter_id: Option<String>,
    pub last_read_page: Option<i64>,
    pub last_opened_at: DateTime<Utc>,
    pub has_unread_update: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl HistoryRecord {
    pub fn from_item(source_id: &str, item: &Item) -> Self {
        let summary = item.summary();
        Self {
            key: ItemKey::new(source_id, summary.id.clone()),
            title: summary.title.clone(),
            thumbnail: summary.thumbnail.clone(),
            latest_label: summary.latest_label.clone(),
            last_read_chapter_id: None,
            last_read_page: None,
            last_opened_at: Utc::now(),
            has_unread_update: false,
            updated_at: None,
        }
    }

    /// Last-write-wins on `last_opened_at`; ties go to `other`.
    pub fn is_superseded_by(&self, other: &HistoryRecord) -> bool {
        other.last_opened_at >= self.last_opened_at
    }
}
