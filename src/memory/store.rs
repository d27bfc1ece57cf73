use super::models::{
    ImportanceLevel, MemoryItem, MemoryStatistics, MemoryTier, SearchQuery, StoreMemoryRequest,
};
use super::strength::constants::DEFAULT_ASSOCIATION_STRENGTH;
use crate::config::MemoryConfig;
use crate::storage::{Query, Snapshot, StorageBackend};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use validator::Validate;

/// Tiered memory with a capacity-bounded working cache in front of the
/// backing store.
///
/// Storage failures never reach the caller: they are logged and the
/// operation degrades to a no-op or an empty result.
#[derive(Debug)]
pub struct MemoryStore {
    pub(super) storage: Arc<dyn StorageBackend>,
    pub(super) config: MemoryConfig,
    pub(super) working: RwLock<HashMap<Uuid, MemoryItem>>,
    associations: RwLock<HashMap<Uuid, HashMap<Uuid, f64>>>,
    pub(super) last_consolidation: RwLock<Option<DateTime<Utc>>>,
}

impl MemoryStore {
    pub fn new(config: MemoryConfig, storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            storage,
            config,
            working: RwLock::new(HashMap::new()),
            associations: RwLock::new(HashMap::new()),
            last_consolidation: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub(super) fn decay_rate_for(&self, tier: MemoryTier) -> f64 {
        self.config.decay_rates.for_tier(tier)
    }

    fn ttl_for(&self, tier: MemoryTier) -> Option<Duration> {
        match tier {
            MemoryTier::Working => Some(Duration::from_secs(self.config.working_ttl_seconds)),
            MemoryTier::ShortTerm => Some(Duration::from_secs(self.config.short_term_ttl_seconds)),
            MemoryTier::LongTerm | MemoryTier::Episodic => None,
        }
    }

    /// Write the item to its tier's collection, refreshing the tier TTL.
    pub(super) async fn persist(&self, item: &MemoryItem) -> bool {
        let value = match serde_json::to_value(item) {
            Ok(value) => value,
            Err(e) => {
                error!(memory_id = %item.id, "Failed to serialize memory: {}", e);
                return false;
            }
        };

        match self
            .storage
            .store_item(
                item.tier.collection(),
                &item.id.to_string(),
                value,
                self.ttl_for(item.tier),
            )
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(memory_id = %item.id, tier = %item.tier, "Failed to persist memory: {}", e);
                false
            }
        }
    }

    pub(super) async fn remove_persisted(&self, tier: MemoryTier, id: Uuid) -> bool {
        match self
            .storage
            .delete_item(tier.collection(), &id.to_string())
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(memory_id = %id, tier = %tier, "Failed to delete memory: {}", e);
                false
            }
        }
    }

    /// Every readable item of a persisted tier; unreadable documents are skipped.
    pub(super) async fn load_tier(&self, tier: MemoryTier) -> Vec<MemoryItem> {
        let documents = match self
            .storage
            .query_collection(tier.collection(), &Query::new())
            .await
        {
            Ok(documents) => documents,
            Err(e) => {
                warn!(tier = %tier, "Failed to load memory tier: {}", e);
                return Vec::new();
            }
        };

        documents
            .into_iter()
            .filter_map(|doc| match serde_json::from_value::<MemoryItem>(doc) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!(tier = %tier, "Skipping unreadable memory document: {}", e);
                    None
                }
            })
            .collect()
    }

    async fn load_from_store(&self, tier: MemoryTier, id: Uuid) -> Option<MemoryItem> {
        match self.storage.get_item(tier.collection(), &id.to_string()).await {
            Ok(Some(doc)) => match serde_json::from_value(doc) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!(memory_id = %id, tier = %tier, "Unreadable memory document: {}", e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(memory_id = %id, tier = %tier, "Failed to read memory: {}", e);
                None
            }
        }
    }

    /// Locate an item without touching it.
    async fn peek(&self, id: Uuid) -> Option<MemoryItem> {
        if let Some(item) = self.working.read().await.get(&id) {
            return Some(item.clone());
        }
        for tier in std::iter::once(MemoryTier::Working).chain(MemoryTier::PERSISTED) {
            if let Some(item) = self.load_from_store(tier, id).await {
                return Some(item);
            }
        }
        None
    }

    pub async fn store_memory(&self, request: StoreMemoryRequest) -> Option<Uuid> {
        if let Err(e) = request.validate() {
            warn!("Rejected memory: {}", e);
            return None;
        }
        if request.content.trim().is_empty() {
            warn!("Rejected memory: content is blank");
            return None;
        }

        let tier = request.tier;
        let item = MemoryItem::new(request, self.decay_rate_for(tier));
        let id = item.id;

        if tier == MemoryTier::Working {
            self.admit_to_working(item).await;
            debug!(memory_id = %id, "Stored working memory");
            return Some(id);
        }

        if self.persist(&item).await {
            debug!(memory_id = %id, tier = %tier, "Stored memory");
            Some(id)
        } else {
            None
        }
    }

    /// Put an item in the working cache and store, demoting any overflow.
    /// Returns how many items were evicted.
    pub(super) async fn admit_to_working(&self, item: MemoryItem) -> usize {
        self.persist(&item).await;

        let evicted = {
            let mut cache = self.working.write().await;
            cache.insert(item.id, item);
            self.take_overflow(&mut cache)
        };

        let count = evicted.len();
        for item in evicted {
            self.demote_to_short_term(item).await;
        }
        count
    }

    /// Remove items from the cache until it fits capacity, weakest first and
    /// least recently accessed among equals.
    pub(super) fn take_overflow(&self, cache: &mut HashMap<Uuid, MemoryItem>) -> Vec<MemoryItem> {
        let now = Utc::now();
        let mut evicted = Vec::new();

        while cache.len() > self.config.working_capacity {
            let victim = cache
                .values()
                .min_by(|a, b| {
                    a.current_strength(now)
                        .partial_cmp(&b.current_strength(now))
                        .unwrap_or(Ordering::Equal)
                        .then_with(|| a.last_accessed.cmp(&b.last_accessed))
                })
                .map(|item| item.id);

            match victim.and_then(|id| cache.remove(&id)) {
                Some(item) => evicted.push(item),
                None => break,
            }
        }
        evicted
    }

    pub(super) async fn demote_to_short_term(&self, mut item: MemoryItem) {
        let id = item.id;
        item.move_to(MemoryTier::ShortTerm, self.decay_rate_for(MemoryTier::ShortTerm));
        if self.persist(&item).await {
            self.remove_persisted(MemoryTier::Working, id).await;
        }
        debug!(memory_id = %id, "Evicted working memory to short-term");
    }

    pub async fn retrieve_memory(&self, id: Uuid) -> Option<MemoryItem> {
        let now = Utc::now();

        let cached = {
            let mut cache = self.working.write().await;
            cache.get_mut(&id).map(|item| {
                item.touch(now);
                item.clone()
            })
        };
        if let Some(item) = cached {
            self.persist(&item).await;
            return Some(item);
        }

        // Working items outlive the cache across restarts
        if let Some(mut item) = self.load_from_store(MemoryTier::Working, id).await {
            item.touch(now);
            self.admit_to_working(item.clone()).await;
            return Some(item);
        }

        for tier in MemoryTier::PERSISTED {
            let Some(mut item) = self.load_from_store(tier, id).await else {
                continue;
            };

            let strength = item.current_strength(now);
            item.touch(now);

            if strength > self.config.promotion_threshold {
                info!(memory_id = %id, from = %tier, strength, "Promoting memory to working tier");
                item.move_to(MemoryTier::Working, self.decay_rate_for(MemoryTier::Working));
                self.admit_to_working(item.clone()).await;
                self.remove_persisted(tier, id).await;
            } else {
                self.persist(&item).await;
            }
            return Some(item);
        }

        debug!(memory_id = %id, "Memory not found");
        None
    }

    pub async fn search_memories(&self, query: SearchQuery) -> Vec<MemoryItem> {
        let now = Utc::now();
        let needle = query.query.to_lowercase();
        let wanted = |tier: MemoryTier| query.tier.map(|t| t == tier).unwrap_or(true);

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        if wanted(MemoryTier::Working) {
            for item in self.working.read().await.values() {
                if seen.insert(item.id) {
                    candidates.push(item.clone());
                }
            }
            for item in self.load_tier(MemoryTier::Working).await {
                if seen.insert(item.id) {
                    candidates.push(item);
                }
            }
        }
        for tier in MemoryTier::PERSISTED {
            if !wanted(tier) {
                continue;
            }
            // An id already seen in a higher tier is a consolidation leftover
            for item in self.load_tier(tier).await {
                if seen.insert(item.id) {
                    candidates.push(item);
                }
            }
        }

        let mut hits: Vec<(f64, MemoryItem)> = candidates
            .into_iter()
            .filter(|item| item.content.to_lowercase().contains(&needle))
            .filter(|item| item.shares_tag(&query.tags))
            .map(|item| (item.current_strength(now), item))
            .collect();
        hits.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
        hits.truncate(query.limit);

        let mut results = Vec::with_capacity(hits.len());
        for (_, mut item) in hits {
            item.touch(now);
            if item.tier == MemoryTier::Working {
                if let Some(cached) = self.working.write().await.get_mut(&item.id) {
                    cached.touch(now);
                }
            }
            self.persist(&item).await;
            results.push(item);
        }

        debug!(query = %query.query, results = results.len(), "Memory search complete");
        results
    }

    pub async fn create_memory_association(&self, first: Uuid, second: Uuid, strength: f64) -> bool {
        if first == second {
            warn!(memory_id = %first, "Refusing to associate a memory with itself");
            return false;
        }
        if !strength.is_finite() || !(0.0..=1.0).contains(&strength) {
            warn!(strength, "Association strength must be between 0.0 and 1.0");
            return false;
        }

        let (Some(mut a), Some(mut b)) = (self.peek(first).await, self.peek(second).await) else {
            warn!(%first, %second, "Cannot associate unknown memories");
            return false;
        };

        a.associations.insert(second);
        b.associations.insert(first);

        {
            let mut index = self.associations.write().await;
            index.entry(first).or_default().insert(second, strength);
            index.entry(second).or_default().insert(first, strength);
        }

        for item in [a, b] {
            if let Some(cached) = self.working.write().await.get_mut(&item.id) {
                cached.associations = item.associations.clone();
            }
            self.persist(&item).await;
        }

        debug!(%first, %second, strength, "Created memory association");
        true
    }

    /// Associated ids with their strength, strongest first.
    pub async fn get_associated_memories(&self, id: Uuid) -> Vec<(Uuid, f64)> {
        let indexed = self.associations.read().await.get(&id).cloned();

        let mut links: Vec<(Uuid, f64)> = match indexed {
            Some(links) if !links.is_empty() => links.into_iter().collect(),
            // Strengths are process-local; persisted links carry ids only
            _ => match self.peek(id).await {
                Some(item) => item
                    .associations
                    .into_iter()
                    .map(|other| (other, DEFAULT_ASSOCIATION_STRENGTH))
                    .collect(),
                None => Vec::new(),
            },
        };

        links.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        links
    }

    pub async fn working_len(&self) -> usize {
        self.working.read().await.len()
    }

    pub async fn working_items(&self) -> Vec<MemoryItem> {
        self.working.read().await.values().cloned().collect()
    }

    pub async fn statistics(&self) -> MemoryStatistics {
        let working_cache_size = self.working_len().await;
        let mut tier_counts = BTreeMap::new();
        tier_counts.insert(MemoryTier::Working, working_cache_size);
        for tier in MemoryTier::PERSISTED {
            tier_counts.insert(tier, self.load_tier(tier).await.len());
        }

        let association_links = self
            .associations
            .read()
            .await
            .values()
            .map(HashMap::len)
            .sum::<usize>()
            / 2;

        MemoryStatistics {
            tier_counts,
            working_cache_size,
            working_capacity: self.config.working_capacity,
            association_links,
            last_consolidation: *self.last_consolidation.read().await,
        }
    }

    /// Refill the working cache from the working collection after a restart.
    pub async fn warm_working_cache(&self) -> usize {
        let mut loaded = 0;
        for item in self.load_tier(MemoryTier::Working).await {
            if self.working.read().await.contains_key(&item.id) {
                continue;
            }
            self.admit_to_working(item).await;
            loaded += 1;
        }
        if loaded > 0 {
            info!(loaded, "Warmed working memory cache from storage");
        }
        loaded
    }

    /// Re-admit the working items held by a snapshot. Returns how many were
    /// restored.
    pub async fn restore_from_snapshot(&self, snapshot: &Snapshot) -> usize {
        let mut restored = 0;
        for value in &snapshot.working_memory {
            match serde_json::from_value::<MemoryItem>(value.clone()) {
                Ok(mut item) => {
                    item.move_to(MemoryTier::Working, self.decay_rate_for(MemoryTier::Working));
                    self.admit_to_working(item).await;
                    restored += 1;
                }
                Err(e) => warn!(snapshot_id = %snapshot.id, "Skipping unreadable snapshot item: {}", e),
            }
        }
        info!(snapshot_id = %snapshot.id, restored, "Restored working memory from snapshot");
        restored
    }

    pub async fn clear_caches(&self) {
        self.working.write().await.clear();
        self.associations.write().await.clear();
        debug!("Cleared memory caches");
    }

    /// Healthy when the cache respects capacity and the store answers.
    pub async fn health_check(&self) -> bool {
        if self.working_len().await > self.config.working_capacity {
            error!("Working memory exceeds capacity");
            return false;
        }
        match self
            .storage
            .query_collection(MemoryTier::Working.collection(), &Query::new().limit(1))
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!("Memory store health check failed: {}", e);
                false
            }
        }
    }

    /// Importance used for episodic memories of large outcomes.
    pub fn outcome_importance(pnl: f64, high_threshold: f64) -> ImportanceLevel {
        if pnl.abs() > high_threshold {
            ImportanceLevel::High
        } else {
            ImportanceLevel::Medium
        }
    }
}
