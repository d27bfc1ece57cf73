//! Periodic movement of memories between tiers.
//!
//! A pass runs in five steps: reconcile items visible in both short-term and
//! long-term, forget weak volatile items, promote strong important short-term
//! items to long-term, enforce the working capacity, then write a snapshot.
//! Moves are insert-then-delete, so a crash mid-pass leaves a duplicate that
//! reads ignore and the next pass removes.

use super::models::{ConsolidationReport, ImportanceLevel, MemoryItem, MemoryTier};
use super::store::MemoryStore;
use crate::storage::Snapshot;
use chrono::Utc;
use rand::seq::SliceRandom;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

impl MemoryStore {
    /// Run a pass unless one ran within the configured interval.
    pub async fn consolidate(&self) -> ConsolidationReport {
        let now = Utc::now();
        if let Some(last) = *self.last_consolidation.read().await {
            let interval =
                i64::try_from(self.config.consolidation_interval_seconds)
                    .ok()
                    .and_then(chrono::Duration::try_seconds)
                    .unwrap_or(chrono::Duration::MAX);
            if now - last < interval {
                debug!(last = %last, "Skipping consolidation, last pass too recent");
                return ConsolidationReport {
                    skipped: true,
                    ..Default::default()
                };
            }
        }
        self.force_consolidate().await
    }

    /// Run a pass regardless of the rate limiter.
    pub async fn force_consolidate(&self) -> ConsolidationReport {
        let started = Instant::now();
        let now = Utc::now();
        let mut report = ConsolidationReport {
            started_at: Some(now),
            ..Default::default()
        };

        let long_term_ids: HashSet<Uuid> = self
            .load_tier(MemoryTier::LongTerm)
            .await
            .into_iter()
            .map(|item| item.id)
            .collect();

        let mut short_term = Vec::new();
        for item in self.load_tier(MemoryTier::ShortTerm).await {
            if long_term_ids.contains(&item.id) {
                if self.remove_persisted(MemoryTier::ShortTerm, item.id).await {
                    report.reconciled += 1;
                }
            } else {
                short_term.push(item);
            }
        }

        let forgettable = |item: &MemoryItem| {
            item.tier.is_volatile()
                && item.current_strength(now) < self.config.expiry_strength_floor
        };
        let expired_working: Vec<Uuid> = {
            let mut cache = self.working.write().await;
            let weak: Vec<Uuid> = cache
                .values()
                .filter(|item| forgettable(*item))
                .map(|item| item.id)
                .collect();
            for id in &weak {
                cache.remove(id);
            }
            weak
        };
        for id in expired_working {
            self.remove_persisted(MemoryTier::Working, id).await;
            report.expired += 1;
        }

        let mut survivors = Vec::with_capacity(short_term.len());
        for item in short_term {
            if forgettable(&item) {
                if self.remove_persisted(MemoryTier::ShortTerm, item.id).await {
                    report.expired += 1;
                }
            } else {
                survivors.push(item);
            }
        }

        let long_term_rate = self.decay_rate_for(MemoryTier::LongTerm);
        for mut item in survivors {
            if item.importance < ImportanceLevel::High
                || item.current_strength(now) <= self.config.promotion_threshold
            {
                continue;
            }
            let id = item.id;
            item.move_to(MemoryTier::LongTerm, long_term_rate);
            if self.persist(&item).await {
                self.remove_persisted(MemoryTier::ShortTerm, id).await;
                report.promoted += 1;
            }
        }

        let overflow = {
            let mut cache = self.working.write().await;
            self.take_overflow(&mut cache)
        };
        report.evicted = overflow.len();
        for item in overflow {
            self.demote_to_short_term(item).await;
        }

        let snapshot = self.build_snapshot().await;
        match self.storage.store_snapshot(&snapshot).await {
            Ok(()) => report.snapshot_written = true,
            Err(e) => warn!("Failed to write consolidation snapshot: {}", e),
        }

        *self.last_consolidation.write().await = Some(now);
        report.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            reconciled = report.reconciled,
            expired = report.expired,
            promoted = report.promoted,
            evicted = report.evicted,
            snapshot = report.snapshot_written,
            duration_ms = report.duration_ms,
            "Memory consolidation complete"
        );
        report
    }

    /// Working tier plus a random short-term sample.
    pub async fn build_snapshot(&self) -> Snapshot {
        let working: Vec<Value> = self
            .working
            .read()
            .await
            .values()
            .filter_map(|item| serde_json::to_value(item).ok())
            .collect();

        let short_term = self.load_tier(MemoryTier::ShortTerm).await;
        let sample: Vec<Value> = {
            let mut rng = rand::thread_rng();
            short_term
                .choose_multiple(&mut rng, self.config.snapshot_sample_size)
                .filter_map(|item| serde_json::to_value(item).ok())
                .collect()
        };

        Snapshot::new(working, sample)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::MemoryConfig;
    use crate::memory::{ImportanceLevel, MemoryItem, MemoryStore, MemoryTier, StoreMemoryRequest};
    use crate::storage::{InMemoryStorage, StorageBackend};
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    async fn put(storage: &InMemoryStorage, item: &MemoryItem) {
        storage
            .store_item(
                item.tier.collection(),
                &item.id.to_string(),
                serde_json::to_value(item).unwrap(),
                None,
            )
            .await
            .unwrap();
    }

    fn item(content: &str, tier: MemoryTier, importance: ImportanceLevel) -> MemoryItem {
        MemoryItem::new(StoreMemoryRequest::new(content, tier, importance), 0.05)
    }

    #[tokio::test]
    async fn test_consolidation_expires_promotes_and_snapshots() {
        let storage = Arc::new(InMemoryStorage::new());
        let store = MemoryStore::new(MemoryConfig::default(), storage.clone());

        let mut stale = item("old noise", MemoryTier::ShortTerm, ImportanceLevel::Low);
        stale.created_at = Utc::now() - Duration::days(5);
        stale.last_accessed = stale.created_at;
        put(&storage, &stale).await;

        let vital = item("stop-loss rule", MemoryTier::ShortTerm, ImportanceLevel::Critical);
        put(&storage, &vital).await;

        let report = store.force_consolidate().await;
        assert_eq!(report.expired, 1);
        assert_eq!(report.promoted, 1);
        assert!(report.snapshot_written);
        assert_eq!(storage.snapshot_count().await, 1);

        assert!(storage
            .get_item(MemoryTier::LongTerm.collection(), &vital.id.to_string())
            .await
            .unwrap()
            .is_some());
        assert_eq!(storage.collection_len(MemoryTier::ShortTerm.collection()).await, 0);
    }

    #[tokio::test]
    async fn test_durable_tiers_are_never_forgotten() {
        let storage = Arc::new(InMemoryStorage::new());
        let store = MemoryStore::new(MemoryConfig::default(), storage.clone());

        let mut faded = item("2019 flash crash", MemoryTier::Episodic, ImportanceLevel::Low);
        faded.decay_rate = 0.5;
        faded.created_at = Utc::now() - Duration::days(400);
        faded.last_accessed = faded.created_at;
        assert!(faded.current_strength(Utc::now()) < 0.5);
        put(&storage, &faded).await;

        let report = store.force_consolidate().await;
        assert_eq!(report.expired, 0);
        assert_eq!(storage.collection_len(MemoryTier::Episodic.collection()).await, 1);
    }

    #[tokio::test]
    async fn test_dual_visibility_is_reconciled() {
        let storage = Arc::new(InMemoryStorage::new());
        let store = MemoryStore::new(MemoryConfig::default(), storage.clone());

        let mut copy = item("half moved", MemoryTier::ShortTerm, ImportanceLevel::Medium);
        put(&storage, &copy).await;
        copy.tier = MemoryTier::LongTerm;
        put(&storage, &copy).await;

        let hits = store
            .search_memories(crate::memory::SearchQuery::new("half moved"))
            .await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].tier, MemoryTier::LongTerm);

        let report = store.force_consolidate().await;
        assert_eq!(report.reconciled, 1);
        assert_eq!(storage.collection_len(MemoryTier::ShortTerm.collection()).await, 0);
    }

    #[tokio::test]
    async fn test_consolidate_is_rate_limited() {
        let store = MemoryStore::new(MemoryConfig::default(), Arc::new(InMemoryStorage::new()));
        assert!(!store.consolidate().await.skipped);
        assert!(store.consolidate().await.skipped);
        assert!(!store.force_consolidate().await.skipped);
    }
}
