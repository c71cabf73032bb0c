//! File records stored as index values.

use std::time::SystemTime;

use chrono::{NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use vdrive_cas::ContentId;

/// RFC1123 with a literal `GMT` zone, e.g. `Mon, 02 Jan 2006 15:04:05 GMT`.
pub const TIMESTAMP_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Metadata for one drive entry.
///
/// `size` is the byte length of the blob behind `content_id`, fixed when the
/// record is created. `timestamp` is advisory and never used for ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub key: String,
    #[serde(rename = "cid")]
    pub content_id: ContentId,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub owner: String,
}

impl File {
    /// New record stamped with the current time.
    pub fn new(key: impl Into<String>, content_id: ContentId, size: u64, owner: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            content_id,
            size,
            timestamp: now_timestamp(),
            owner: owner.into(),
        }
    }

    /// Parsed `timestamp`, if it is in the expected format.
    pub fn modified(&self) -> Option<SystemTime> {
        parse_timestamp(&self.timestamp)
    }
}

pub fn now_timestamp() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(s: &str) -> Option<SystemTime> {
    let naive = NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).ok()?;
    Some(Utc.from_utc_datetime(&naive).into())
}
