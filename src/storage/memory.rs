use super::document::CollectionSet;
use super::{Query, Result, Snapshot, StorageBackend, StorageError, DEFAULT_MAX_SNAPSHOTS};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// Process-local storage backend. Used by tests and by runtimes that do not
/// need anything to survive the process.
#[derive(Debug)]
pub struct InMemoryStorage {
    collections: RwLock<CollectionSet>,
    snapshots: RwLock<Vec<Snapshot>>,
    archives: RwLock<HashMap<String, Vec<Value>>>,
    unavailable: AtomicBool,
    max_snapshots: usize,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self {
            collections: RwLock::default(),
            snapshots: RwLock::default(),
            archives: RwLock::default(),
            unavailable: AtomicBool::new(false),
            max_snapshots: DEFAULT_MAX_SNAPSHOTS,
        }
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `max` snapshots (at least one).
    pub fn with_max_snapshots(mut self, max: usize) -> Self {
        self.max_snapshots = max.max(1);
        self
    }

    /// Make every subsequent call fail with [`StorageError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn archive(&self, date_key: &str) -> Option<Vec<Value>> {
        self.archives.read().await.get(date_key).cloned()
    }

    pub async fn snapshot_count(&self) -> usize {
        self.snapshots.read().await.len()
    }

    pub async fn collection_len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .query(collection, &Query::new())
            .len()
    }

    fn ensure_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable(
                "in-memory storage switched off".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StorageBackend for InMemoryStorage {
    async fn store_item(
        &self,
        collection: &str,
        id: &str,
        data: Value,
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.ensure_available()?;
        self.collections
            .write()
            .await
            .insert(collection, id, data, ttl);
        Ok(())
    }

    async fn get_item(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        self.ensure_available()?;
        Ok(self.collections.read().await.get(collection, id))
    }

    async fn query_collection(&self, collection: &str, query: &Query) -> Result<Vec<Value>> {
        self.ensure_available()?;
        Ok(self.collections.read().await.query(collection, query))
    }

    async fn update_item(&self, collection: &str, id: &str, patch: Value) -> Result<()> {
        self.ensure_available()?;
        self.collections.write().await.update(collection, id, patch)
    }

    async fn delete_item(&self, collection: &str, id: &str) -> Result<()> {
        self.ensure_available()?;
        self.collections.write().await.remove(collection, id);
        Ok(())
    }

    async fn store_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        self.ensure_available()?;
        let mut snapshots = self.snapshots.write().await;
        snapshots.push(snapshot.clone());
        if snapshots.len() > self.max_snapshots {
            snapshots.sort_by_key(|s| s.created_at);
            let excess = snapshots.len() - self.max_snapshots;
            snapshots.drain(..excess);
        }
        Ok(())
    }

    async fn load_latest_snapshot(&self) -> Result<Option<Snapshot>> {
        self.ensure_available()?;
        Ok(self
            .snapshots
            .read()
            .await
            .iter()
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn store_archive(&self, items: &[Value], date_key: &str) -> Result<()> {
        self.ensure_available()?;
        self.archives
            .write()
            .await
            .insert(date_key.to_string(), items.to_vec());
        Ok(())
    }

    async fn health_check(&self) -> Result<HashMap<String, bool>> {
        let available = !self.unavailable.load(Ordering::SeqCst);
        let mut components = HashMap::new();
        components.insert("document_store".to_string(), available);
        components.insert("object_store".to_string(), available);
        Ok(components)
    }
}
