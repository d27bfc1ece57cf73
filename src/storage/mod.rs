//! Abstract persistence boundary.
//!
//! Every subsystem talks to storage through [`StorageBackend`]: a namespaced
//! document store with equality/range filters, ordering and a limit. There
//! are no joins and no multi-operation transactions.

pub mod document;
pub mod file;
pub mod memory;

pub use document::{Filter, FilterOp, OrderBy, Query, SortDirection};
pub use file::FileStorage;
pub use memory::InMemoryStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("Item not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Start of a lookback window ending at `end`, clamped to the Unix epoch so
/// timestamp filters always compare as RFC 3339. `None` (an out-of-range
/// window) reaches back to the epoch.
pub fn window_start(end: DateTime<Utc>, window: Option<chrono::Duration>) -> DateTime<Utc> {
    window
        .and_then(|w| end.checked_sub_signed(w))
        .map_or(DateTime::UNIX_EPOCH, |start| start.max(DateTime::UNIX_EPOCH))
}

/// Snapshots a backend keeps before pruning the oldest.
pub const DEFAULT_MAX_SNAPSHOTS: usize = 24;

/// Collection names shared by the subsystems.
pub mod collections {
    pub const THOUGHTS: &str = "thoughts";
    pub const THOUGHT_PATTERNS: &str = "thought_patterns";
    pub const COGNITIVE_STATE: &str = "cognitive_state";
    pub const STATE_TRANSITIONS: &str = "state_transitions";
    pub const DECISION_ANALYSES: &str = "decision_analyses";
    pub const BIAS_DETECTIONS: &str = "bias_detections";
    pub const LEARNING_METRICS: &str = "learning_metrics";
    pub const PERFORMANCE_ATTRIBUTIONS: &str = "performance_attributions";

    /// Id of the singleton state record.
    pub const CURRENT_STATE_ID: &str = "current";
}

/// Point-in-time copy of the cognitive runtime used for disaster recovery.
///
/// The memory store fills the two memory sections during consolidation. The
/// orchestrator fills `state`, `recent_thoughts` and `metrics` when it writes
/// a full backup; consolidation snapshots leave them empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub working_memory: Vec<Value>,
    pub short_term_sample: Vec<Value>,
    pub state: Option<Value>,
    pub recent_thoughts: Vec<Value>,
    pub metrics: Value,
}

impl Snapshot {
    pub fn new(working_memory: Vec<Value>, short_term_sample: Vec<Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            working_memory,
            short_term_sample,
            state: None,
            recent_thoughts: Vec::new(),
            metrics: Value::Null,
        }
    }
}

#[async_trait]
pub trait StorageBackend: Send + Sync + std::fmt::Debug {
    /// Insert or replace a document. `ttl` makes the item invisible once elapsed.
    async fn store_item(
        &self,
        collection: &str,
        id: &str,
        data: Value,
        ttl: Option<Duration>,
    ) -> Result<()>;

    async fn get_item(&self, collection: &str, id: &str) -> Result<Option<Value>>;

    async fn query_collection(&self, collection: &str, query: &Query) -> Result<Vec<Value>>;

    /// Shallow-merge the fields of `patch` into an existing document.
    async fn update_item(&self, collection: &str, id: &str, patch: Value) -> Result<()>;

    async fn delete_item(&self, collection: &str, id: &str) -> Result<()>;

    async fn store_snapshot(&self, snapshot: &Snapshot) -> Result<()>;

    async fn load_latest_snapshot(&self) -> Result<Option<Snapshot>>;

    async fn store_archive(&self, items: &[Value], date_key: &str) -> Result<()>;

    async fn health_check(&self) -> Result<HashMap<String, bool>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_start_clamps_to_epoch() {
        let end = Utc::now();
        let hour = chrono::Duration::try_hours(1);
        assert_eq!(window_start(end, hour), end - chrono::Duration::hours(1));
        assert_eq!(window_start(end, None), DateTime::UNIX_EPOCH);
        assert_eq!(
            window_start(end, chrono::Duration::try_days(1_000_000)),
            DateTime::UNIX_EPOCH
        );
    }
}
