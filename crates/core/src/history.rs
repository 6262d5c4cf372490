//! History Log trait: append-only transcript per (scope, character).
//!
//! Switching a scope's character starts a new stream keyed by the new
//! character's name; the old stream is never touched.

use crate::error::HistoryError;
use crate::scope::{ScopeId, sanitize_file_component};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Timestamp layout used by older transcripts (`2025-03-01@18:22:05`).
pub const LEGACY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d@%H:%M:%S";

/// One stored turn half: either the user's message or the character's reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(alias = "name")]
    pub speaker_name: String,

    pub is_user: bool,

    #[serde(alias = "msg")]
    pub text: String,

    #[serde(alias = "create_date", deserialize_with = "flexible_timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    /// A user-side record.
    pub fn user(
        speaker_name: impl Into<String>,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            speaker_name: speaker_name.into(),
            is_user: true,
            text: text.into(),
            timestamp,
        }
    }

    /// A character-side record.
    pub fn reply(
        speaker_name: impl Into<String>,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            speaker_name: speaker_name.into(),
            is_user: false,
            text: text.into(),
            timestamp,
        }
    }

    /// Raise the timestamp to `floor` if it is earlier. Keeps stored order
    /// non-decreasing when the wall clock steps backwards.
    pub fn not_before(mut self, floor: Option<DateTime<Utc>>) -> Self {
        if let Some(floor) = floor {
            if self.timestamp < floor {
                self.timestamp = floor;
            }
        }
        self
    }
}

fn flexible_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| {
        serde::de::Error::custom(format!("unrecognised timestamp '{raw}'"))
    })
}

/// Parse an RFC 3339 or legacy timestamp. Legacy values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, LEGACY_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Addresses one history stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HistoryKey {
    pub scope: ScopeId,
    pub character: String,
}

impl HistoryKey {
    pub fn new(scope: ScopeId, character: impl Into<String>) -> Self {
        Self {
            scope,
            character: character.into(),
        }
    }

    /// `group-123-Nia.jsonl`
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}.jsonl",
            self.scope.file_stem(),
            sanitize_file_component(&self.character)
        )
    }
}

impl std::fmt::Display for HistoryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.scope, self.character)
    }
}

/// Storage for conversation transcripts.
#[async_trait]
pub trait HistoryLog: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Append a completed turn: the user record then the reply record.
    ///
    /// Both records land or neither does, and a concurrent append for the
    /// same key never interleaves with this one.
    async fn append(
        &self,
        key: &HistoryKey,
        user_turn: HistoryEntry,
        reply_turn: HistoryEntry,
    ) -> Result<(), HistoryError>;

    /// The most recent `depth` records, oldest first.
    ///
    /// A stream that does not exist yet reads as empty and is created.
    async fn read_window(
        &self,
        key: &HistoryKey,
        depth: usize,
    ) -> Result<Vec<HistoryEntry>, HistoryError>;

    /// Truncate the stream to empty.
    async fn clear(&self, key: &HistoryKey) -> Result<(), HistoryError>;
}
