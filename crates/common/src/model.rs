// Core domain types shared across all limpet crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Arbitrary caller-supplied key/value metadata attached to a document.
pub type Metadata = Map<String, Value>;

/// One immutable entry pointing at a persisted snapshot of a document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Version {
    /// When the snapshot was persisted.
    pub timestamp: DateTime<Utc>,
    /// Opaque key returned by the storage backend's `put`.
    pub storage_key: String,
    /// Backend tag, so reads route correctly even if defaults change.
    pub storage_type: String,
}

/// Scheduling bucket a document currently occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleState {
    /// Never attempted; bootstraps ahead of merely stale documents.
    NeverFetched,
    /// Next automatic refetch is due at the contained time.
    Scheduled(DateTime<Utc>),
    /// Permanently retired from auto-scheduling (one-shot classes).
    Retired,
}

/// The kernel's record of one URL it proactively refetches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackedDocument {
    pub id: String,
    /// Canonical URL as supplied by the caller. Whitespace is
    /// percent-encoded at fetch time, never in the stored value.
    pub url: String,
    pub doc_class: String,
    #[serde(default)]
    pub metadata: Metadata,
    /// Random tiebreaker fixed at creation; diffuses load across hosts
    /// when many documents become due at once.
    pub random_key: i64,
    /// Append-only history, oldest first.
    #[serde(default)]
    pub versions: Vec<Version>,
    /// Most recent update attempt; `None` until the first attempt.
    pub last_update: Option<DateTime<Utc>>,
    /// Next scheduled attempt; `None` before the first attempt means
    /// "never fetched", `None` afterwards means "do not auto-refetch".
    pub next_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub consecutive_errors: u32,
}

impl TrackedDocument {
    pub fn schedule(&self) -> ScheduleState {
        match (self.last_update, self.next_update) {
            (None, _) => ScheduleState::NeverFetched,
            (Some(_), Some(at)) => ScheduleState::Scheduled(at),
            (Some(_), None) => ScheduleState::Retired,
        }
    }

    /// Most recently stored version, if any.
    pub fn last_version(&self) -> Option<&Version> {
        self.versions.last()
    }
}

/// A named update policy shared by a group of tracked documents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DocClass {
    /// Refetch cadence in minutes; `None` means one-shot.
    pub update_mins: Option<f64>,
    /// Storage backend name; falls back to the configured default.
    pub storage_engine: Option<String>,
    /// Downstream tasks dispatched when a new version lands.
    pub onchanged: Vec<String>,
    /// Versioning scheme used for change detection.
    pub versioning: String,
    /// Optional text extractor name, for downstream consumers.
    pub extract_text: Option<String>,
}

impl Default for DocClass {
    fn default() -> Self {
        Self {
            update_mins: None,
            storage_engine: None,
            onchanged: Vec::new(),
            versioning: "md5".into(),
            extract_text: None,
        }
    }
}

/// One entry in the capped audit ring.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub action: String,
    pub url: String,
    /// `None` for success, a short message otherwise.
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Metadata,
}

impl LogEntry {
    pub fn new(action: impl Into<String>, url: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            action: action.into(),
            url: url.into(),
            error: None,
            timestamp,
            extra: Metadata::new(),
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Point-in-time counters reported by the inspection surface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusSummary {
    /// Total tracked documents.
    pub tracking: u64,
    /// Documents currently due (never-fetched plus stale).
    pub need_update: u64,
    /// Update jobs dispatched but not yet completed.
    pub in_flight: i64,
}
