//! JSON shapes exchanged with source and sync servers, and their
//! conversion into domain models.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use html_escape::decode_html_entities;
use serde::{Deserialize, Serialize};

use crate::domain::{Chapter, Detail, HistoryRecord, Item, ItemKey, Summary};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerInfo {
    pub version: Option<String>,
    pub available_drivers: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriverInfo {
    pub supported_categories: Vec<String>,
    pub support_suggestion: bool,
    pub recommended_chunk_size: usize,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct OnlineStatus {
    pub online: bool,
    /// Milliseconds
    pub latency: u64,
}

pub type OnlineMap = HashMap<String, OnlineStatus>;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WireChapters {
    pub serial: Vec<WireChapter>,
    pub extra: Vec<WireChapter>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WireChapter {
    pub id: String,
    pub title: String,
}

/// An item as drivers return it. The presence of `chapters` marks the
/// detailed form.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WireItem {
    pub id: String,
    pub title: String,
    pub latest: Option<String>,
    pub is_ended: bool,
    pub thumbnail: Option<String>,
    pub description: Option<String>,
    pub genres: Vec<String>,
    pub authors: Vec<String>,
    pub chapters: Option<WireChapters>,
    /// Milliseconds since the epoch
    pub updated_at: Option<i64>,
}

fn decode(s: &str) -> String {
    decode_html_entities(s).to_string()
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

impl WireItem {
    pub fn into_item(self) -> Item {
        let summary = Summary {
            id: self.id,
            title: decode(&self.title),
            latest_label: self.latest.as_deref().map(decode),
            is_ended: self.is_ended,
            thumbnail: self.thumbnail,
        };

        let Some(chapters) = self.chapters else {
            return Item::Summary(summary);
        };

        let convert = |chapters: Vec<WireChapter>| {
            chapters
                .into_iter()
                .map(|c| Chapter {
                    id: c.id,
                    title: decode(&c.title),
                })
                .collect()
        };

        Item::Detail(Detail {
            summary,
            description: self.description.as_deref().map(decode),
            genres: self.genres,
            authors: self.authors.iter().map(|a| decode(a)).collect(),
            serial_chapters: convert(chapters.serial),
            extra_chapters: convert(chapters.extra),
            updated_at: self.updated_at.and_then(from_millis),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IdsBody<'a> {
    pub ids: &'a [String],
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsBody {
    /// Base64 encoded settings blob
    pub settings: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SyncHashes {
    pub settings: String,
    pub history: String,
    pub collections: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionRef {
    pub id: String,
    pub driver: String,
}

impl CollectionRef {
    pub fn key(&self) -> ItemKey {
        ItemKey::new(&self.driver, self.id.clone())
    }
}

impl From<&ItemKey> for CollectionRef {
    fn from(key: &ItemKey) -> Self {
        Self {
            id: key.item_id.clone(),
            driver: key.source_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WireHistory {
    pub driver: String,
    pub id: String,
    pub title: String,
    pub thumbnail: Option<String>,
    pub latest: Option<String>,
    pub last_read_chapter_id: Option<String>,
    pub last_read_page: Option<i64>,
    pub last_opened_at: i64,
    pub has_unread_update: bool,
    pub updated_at: Option<i64>,
}

impl From<&HistoryRecord> for WireHistory {
    fn from(record: &HistoryRecord) -> Self {
        Self {
            driver: record.key.source_id.clone(),
            id: record.key.item_id.clone(),
            title: record.title.clone(),
            thumbnail: record.thumbnail.clone(),
            latest: record.latest_label.clone(),
            last_read_chapter_id: record.last_read_chapter_id.clone(),
            last_read_page: record.last_read_page,
            last_opened_at: record.last_opened_at.timestamp_millis(),
            has_unread_update: record.has_unread_update,
            updated_at: record.updated_at.map(|dt| dt.timestamp_millis()),
        }
    }
}

impl WireHistory {
    pub fn into_record(self) -> HistoryRecord {
        HistoryRecord {
            key: ItemKey::new(&self.driver, self.id),
            title: self.title,
            thumbnail: self.thumbnail,
            latest_label: self.latest,
            last_read_chapter_id: self.last_read_chapter_id,
            last_read_page: self.last_read_page,
            last_opened_at: from_millis(self.last_opened_at).unwrap_or_else(Utc::now),
            has_unread_update: self.has_unread_update,
            updated_at: self.updated_at.and_then(from_millis),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistoryPage {
    pub records: Vec<HistoryRecord>,
    pub has_next: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Credentials<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionToken {
    pub token: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccountInfo {
    pub email: String,
    pub created_at: Option<i64>,
}
