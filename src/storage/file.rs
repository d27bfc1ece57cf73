//! File-backed storage: snapshot files and zstd-compressed daily archives
//! under a single data directory, plus one compacted JSON file and one
//! append-only operation log per collection.
//!
//! A mutation appends a line to `<name>.log`. Once a collection's log holds
//! the configured number of entries it is folded into `<name>.json` and
//! removed. Log entries are idempotent, so replaying a log over a base file
//! that already contains it yields the same state.

use super::document::{Collection, CollectionSet, StoredDocument};
use super::{Query, Result, Snapshot, StorageBackend, StorageError, DEFAULT_MAX_SNAPSHOTS};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

const COLLECTIONS_DIR: &str = "collections";
const SNAPSHOTS_DIR: &str = "snapshots";
const ARCHIVE_DIR: &str = "archive";
const ARCHIVE_COMPRESSION_LEVEL: i32 = 3;

/// Log entries per collection before it is compacted.
pub const DEFAULT_COMPACTION_THRESHOLD: usize = 512;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum LogEntry {
    Put { id: String, document: StoredDocument },
    Delete { id: String },
}

#[derive(Debug)]
pub struct FileStorage {
    root: PathBuf,
    collections: RwLock<CollectionSet>,
    /// Entries appended to each collection log since its last compaction
    log_lengths: Mutex<HashMap<String, usize>>,
    max_snapshots: usize,
    compaction_threshold: usize,
}

impl FileStorage {
    /// Open (creating if needed) a data directory and load every collection.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for dir in [COLLECTIONS_DIR, SNAPSHOTS_DIR, ARCHIVE_DIR] {
            fs::create_dir_all(root.join(dir)).await?;
        }

        let dir = root.join(COLLECTIONS_DIR);
        let mut names = BTreeSet::new();
        let mut logged = BTreeSet::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match path.extension().and_then(|e| e.to_str()) {
                Some("json") => {
                    names.insert(name.to_string());
                }
                Some("log") => {
                    names.insert(name.to_string());
                    logged.insert(name.to_string());
                }
                _ => {}
            }
        }

        let mut set = CollectionSet::new();
        for name in &names {
            let mut documents = load_base(&dir.join(format!("{name}.json"))).await?;
            if logged.contains(name) {
                let replayed =
                    replay_log(&dir.join(format!("{name}.log")), &mut documents).await?;
                debug!(collection = %name, replayed, "Replayed collection log");
            }
            set.replace_collection(name, documents);
        }

        let purged = set.purge_expired();
        info!(
            "Opened file storage at {} ({} collections, {} purged of expired items)",
            root.display(),
            set.collection_names().len(),
            purged.len()
        );

        let storage = Self {
            root,
            collections: RwLock::new(set),
            log_lengths: Mutex::new(HashMap::new()),
            max_snapshots: DEFAULT_MAX_SNAPSHOTS,
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
        };
        // Start every collection from a compacted base file
        let dirty: BTreeSet<String> = logged.into_iter().chain(purged).collect();
        {
            let set = storage.collections.read().await;
            for name in &dirty {
                storage.compact(&set, name).await?;
            }
        }
        Ok(storage)
    }

    /// Keep at most `max` snapshot files (at least one).
    pub fn with_max_snapshots(mut self, max: usize) -> Self {
        self.max_snapshots = max.max(1);
        self
    }

    /// Compact a collection once its log holds `entries` entries.
    pub fn with_compaction_threshold(mut self, entries: usize) -> Self {
        self.compaction_threshold = entries.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_path(&self, name: &str) -> PathBuf {
        self.root.join(COLLECTIONS_DIR).join(format!("{name}.json"))
    }

    fn log_path(&self, name: &str) -> PathBuf {
        self.root.join(COLLECTIONS_DIR).join(format!("{name}.log"))
    }

    /// Fold the in-memory collection into its base file and drop the log.
    async fn compact(&self, set: &CollectionSet, name: &str) -> Result<()> {
        let empty = Collection::new();
        let documents = set.collection(name).unwrap_or(&empty);
        let bytes = serde_json::to_vec(documents)?;
        write_atomic(&self.collection_path(name), &bytes).await?;

        match fs::remove_file(self.log_path(name)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.log_lengths.lock().await.remove(name);
        debug!(collection = %name, documents = documents.len(), "Compacted collection");
        Ok(())
    }

    /// Append one entry; compacts when the log reaches the threshold. The
    /// caller holds the collections write lock.
    async fn append(&self, set: &CollectionSet, name: &str, entry: &LogEntry) -> Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(name))
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;

        let length = {
            let mut lengths = self.log_lengths.lock().await;
            let length = lengths.entry(name.to_string()).or_default();
            *length += 1;
            *length
        };
        if length >= self.compaction_threshold {
            self.compact(set, name).await?;
        }
        Ok(())
    }

    async fn append_put(&self, set: &CollectionSet, name: &str, id: &str) -> Result<()> {
        let document = set
            .collection(name)
            .and_then(|c| c.get(id))
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                collection: name.to_string(),
                id: id.to_string(),
            })?;
        let entry = LogEntry::Put {
            id: id.to_string(),
            document,
        };
        self.append(set, name, &entry).await
    }

    async fn prune_snapshots(&self) -> Result<()> {
        let mut files = Vec::new();
        let mut entries = fs::read_dir(self.root.join(SNAPSHOTS_DIR)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                files.push(path);
            }
        }
        if files.len() <= self.max_snapshots {
            return Ok(());
        }

        // Fixed-width timestamps make file names sort chronologically
        files.sort();
        let excess = files.len() - self.max_snapshots;
        for path in files.into_iter().take(excess) {
            fs::remove_file(&path).await?;
            debug!("Pruned snapshot {}", path.display());
        }
        Ok(())
    }
}

async fn load_base(path: &Path) -> Result<Collection> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Collection::new()),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_slice::<Collection>(&bytes) {
        Ok(documents) => Ok(documents),
        Err(e) => {
            warn!("Skipping unreadable collection file {}: {}", path.display(), e);
            Ok(Collection::new())
        }
    }
}

/// Apply every readable line of a log; a torn final line is skipped.
async fn replay_log(path: &Path, documents: &mut Collection) -> Result<usize> {
    let raw = fs::read_to_string(path).await?;
    let mut applied = 0;
    for line in raw.lines().filter(|l| !l.trim().is_empty()) {
        match serde_json::from_str::<LogEntry>(line) {
            Ok(LogEntry::Put { id, document }) => {
                documents.insert(id, document);
                applied += 1;
            }
            Ok(LogEntry::Delete { id }) => {
                documents.remove(&id);
                applied += 1;
            }
            Err(e) => warn!("Skipping unreadable log line in {}: {}", path.display(), e),
        }
    }
    Ok(applied)
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl StorageBackend for FileStorage {
    async fn store_item(
        &self,
        collection: &str,
        id: &str,
        data: Value,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let mut set = self.collections.write().await;
        set.insert(collection, id, data, ttl);
        self.append_put(&set, collection, id).await
    }

    async fn get_item(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        Ok(self.collections.read().await.get(collection, id))
    }

    async fn query_collection(&self, collection: &str, query: &Query) -> Result<Vec<Value>> {
        Ok(self.collections.read().await.query(collection, query))
    }

    async fn update_item(&self, collection: &str, id: &str, patch: Value) -> Result<()> {
        let mut set = self.collections.write().await;
        set.update(collection, id, patch)?;
        self.append_put(&set, collection, id).await
    }

    async fn delete_item(&self, collection: &str, id: &str) -> Result<()> {
        let mut set = self.collections.write().await;
        if set.remove(collection, id) {
            let entry = LogEntry::Delete { id: id.to_string() };
            self.append(&set, collection, &entry).await?;
        }
        Ok(())
    }

    async fn store_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let file_name = format!(
            "snapshot-{}-{}.json",
            snapshot.created_at.format("%Y%m%dT%H%M%S%.6fZ"),
            snapshot.id
        );
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        write_atomic(&self.root.join(SNAPSHOTS_DIR).join(&file_name), &bytes).await?;
        debug!("Stored snapshot {}", file_name);
        self.prune_snapshots().await
    }

    async fn load_latest_snapshot(&self) -> Result<Option<Snapshot>> {
        let mut latest: Option<PathBuf> = None;
        let mut entries = fs::read_dir(self.root.join(SNAPSHOTS_DIR)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            // Fixed-width timestamps make file names sort chronologically
            if latest.as_ref().map(|l| path > *l).unwrap_or(true) {
                latest = Some(path);
            }
        }

        match latest {
            Some(path) => {
                let bytes = fs::read(&path).await?;
                Ok(Some(serde_json::from_slice(&bytes)?))
            }
            None => Ok(None),
        }
    }

    async fn store_archive(&self, items: &[Value], date_key: &str) -> Result<()> {
        let json = serde_json::to_vec(items)?;
        let compressed = zstd::encode_all(json.as_slice(), ARCHIVE_COMPRESSION_LEVEL)?;
        let checksum = hex::encode(Sha256::digest(&compressed));

        let dir = self.root.join(ARCHIVE_DIR);
        write_atomic(&dir.join(format!("{date_key}.json.zst")), &compressed).await?;
        write_atomic(&dir.join(format!("{date_key}.sha256")), checksum.as_bytes()).await?;

        info!(
            "Archived {} items for {} ({} -> {} bytes)",
            items.len(),
            date_key,
            json.len(),
            compressed.len()
        );
        Ok(())
    }

    async fn health_check(&self) -> Result<HashMap<String, bool>> {
        let mut components = HashMap::new();

        let probe = self.root.join(".health_probe");
        let writable = match fs::write(&probe, b"ok").await {
            Ok(()) => fs::remove_file(&probe).await.is_ok(),
            Err(e) => {
                warn!("Data directory {} not writable: {}", self.root.display(), e);
                false
            }
        };
        components.insert("document_store".to_string(), writable);

        let archive_ok = fs::metadata(self.root.join(ARCHIVE_DIR))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        components.insert("object_store".to_string(), archive_ok);

        Ok(components)
    }
}

/// Read back an archive written by [`FileStorage::store_archive`], verifying
/// its checksum.
pub async fn read_archive(root: impl AsRef<Path>, date_key: &str) -> Result<Vec<Value>> {
    let dir = root.as_ref().join(ARCHIVE_DIR);
    let compressed = fs::read(dir.join(format!("{date_key}.json.zst"))).await?;
    let expected = fs::read_to_string(dir.join(format!("{date_key}.sha256"))).await?;
    let actual = hex::encode(Sha256::digest(&compressed));
    if expected.trim() != actual {
        return Err(StorageError::Backend(format!(
            "archive {date_key} checksum mismatch"
        )));
    }
    let json = zstd::decode_all(compressed.as_slice())?;
    Ok(serde_json::from_slice(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_collections_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let storage = FileStorage::open(dir.path()).await.unwrap();
            storage
                .store_item("thoughts", "t1", json!({"decision": "buy"}), None)
                .await
                .unwrap();
            storage
                .update_item("thoughts", "t1", json!({"outcome": "win"}))
                .await
                .unwrap();
        }

        let reopened = FileStorage::open(dir.path()).await.unwrap();
        let item = reopened.get_item("thoughts", "t1").await.unwrap().unwrap();
        assert_eq!(item, json!({"decision": "buy", "outcome": "win"}));
    }

    #[tokio::test]
    async fn test_archive_round_trip_with_checksum() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();
        let items = vec![json!({"id": 1}), json!({"id": 2})];

        storage.store_archive(&items, "2024-03-01").await.unwrap();
        let restored = read_archive(dir.path(), "2024-03-01").await.unwrap();
        assert_eq!(restored, items);
    }

    #[tokio::test]
    async fn test_latest_snapshot_by_timestamp() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();
        assert!(storage.load_latest_snapshot().await.unwrap().is_none());

        let older = Snapshot::new(vec![], vec![]);
        let mut newer = Snapshot::new(vec![json!({"content": "x"})], vec![]);
        newer.created_at = older.created_at + chrono::Duration::seconds(5);
        storage.store_snapshot(&newer).await.unwrap();
        storage.store_snapshot(&older).await.unwrap();

        let latest = storage.load_latest_snapshot().await.unwrap().unwrap();
        assert_eq!(latest.id, newer.id);
        assert!(storage.health_check().await.unwrap().values().all(|ok| *ok));
    }

    #[tokio::test]
    async fn test_writes_append_to_log_until_compaction() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join(COLLECTIONS_DIR).join("thoughts.log");
        let base = dir.path().join(COLLECTIONS_DIR).join("thoughts.json");
        {
            let storage = FileStorage::open(dir.path())
                .await
                .unwrap()
                .with_compaction_threshold(4);
            for i in 0..3 {
                storage
                    .store_item("thoughts", &format!("t{i}"), json!({"n": i}), None)
                    .await
                    .unwrap();
            }
            assert_eq!(fs::read_to_string(&log).await.unwrap().lines().count(), 3);
            assert!(!base.exists());

            // Fourth entry reaches the threshold
            storage.delete_item("thoughts", "t0").await.unwrap();
            assert!(!log.exists());
            let compacted: Collection =
                serde_json::from_slice(&fs::read(&base).await.unwrap()).unwrap();
            assert_eq!(compacted.len(), 2);

            storage
                .update_item("thoughts", "t1", json!({"outcome": "win"}))
                .await
                .unwrap();
            assert_eq!(fs::read_to_string(&log).await.unwrap().lines().count(), 1);
        }

        let reopened = FileStorage::open(dir.path()).await.unwrap();
        assert!(reopened.get_item("thoughts", "t0").await.unwrap().is_none());
        assert_eq!(
            reopened.get_item("thoughts", "t1").await.unwrap(),
            Some(json!({"n": 1, "outcome": "win"}))
        );
        assert!(!log.exists());
    }

    #[tokio::test]
    async fn test_torn_log_line_is_skipped() {
        let dir = TempDir::new().unwrap();
        {
            let storage = FileStorage::open(dir.path()).await.unwrap();
            storage
                .store_item("items", "a", json!({"v": 1}), None)
                .await
                .unwrap();
        }
        let log = dir.path().join(COLLECTIONS_DIR).join("items.log");
        let mut file = OpenOptions::new().append(true).open(&log).await.unwrap();
        file.write_all(b"{\"op\":\"put\",\"id\":").await.unwrap();
        file.flush().await.unwrap();

        let reopened = FileStorage::open(dir.path()).await.unwrap();
        assert_eq!(
            reopened.get_item("items", "a").await.unwrap(),
            Some(json!({"v": 1}))
        );
    }

    #[tokio::test]
    async fn test_snapshot_files_are_pruned() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::open(dir.path())
            .await
            .unwrap()
            .with_max_snapshots(2);
        let base = chrono::Utc::now();
        let mut newest = None;
        for i in 0..4 {
            let mut snapshot = Snapshot::new(vec![], vec![]);
            snapshot.created_at = base + chrono::Duration::seconds(i);
            newest = Some(snapshot.id);
            storage.store_snapshot(&snapshot).await.unwrap();
        }

        let mut files = 0;
        let mut entries = fs::read_dir(dir.path().join(SNAPSHOTS_DIR)).await.unwrap();
        while entries.next_entry().await.unwrap().is_some() {
            files += 1;
        }
        assert_eq!(files, 2);
        let latest = storage.load_latest_snapshot().await.unwrap().unwrap();
        assert_eq!(Some(latest.id), newest);
    }
}
