use super::models::{
    DecisionType, JournalStatistics, NewThought, ThoughtEntry, ThoughtPattern, ThoughtQuery,
};
use super::patterns::{detect_patterns, word_set};
use crate::config::JournalConfig;
use crate::storage::{collections, window_start, Filter, Query, SortDirection, StorageBackend};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

const MAX_CACHED_PATTERNS: usize = 50;

/// Append-only log of decisions. Every entry is cached in a bounded recent
/// window and written to storage; reads fall back to the cache when storage
/// is unreachable.
#[derive(Debug)]
pub struct ThoughtJournal {
    storage: Arc<dyn StorageBackend>,
    config: JournalConfig,
    recent: RwLock<VecDeque<ThoughtEntry>>,
    patterns: RwLock<VecDeque<ThoughtPattern>>,
}

fn parse_entries(documents: Vec<Value>) -> Vec<ThoughtEntry> {
    documents
        .into_iter()
        .filter_map(|doc| match serde_json::from_value(doc) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable thought: {}", e);
                None
            }
        })
        .collect()
}

impl ThoughtJournal {
    pub fn new(config: JournalConfig, storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            storage,
            config,
            recent: RwLock::new(VecDeque::new()),
            patterns: RwLock::new(VecDeque::new()),
        }
    }

    pub async fn record_thought(&self, thought: NewThought) -> Option<Uuid> {
        if let Err(e) = thought.validate() {
            warn!("Rejected thought: {}", e);
            return None;
        }
        if thought.decision.trim().is_empty() {
            warn!("Rejected thought: decision is blank");
            return None;
        }

        let related_thoughts = self
            .find_related(&format!("{} {}", thought.decision, thought.reasoning))
            .await;

        let entry = ThoughtEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            importance_score: ThoughtEntry::importance_for(thought.decision_type, thought.confidence),
            follow_up_required: ThoughtEntry::needs_follow_up(thought.decision_type, thought.confidence),
            decision: thought.decision,
            reasoning: thought.reasoning,
            confidence: thought.confidence,
            emotional_state: thought.emotional_state,
            market_context: thought.market_context,
            decision_type: thought.decision_type,
            tags: thought.tags,
            related_thoughts,
            strategy_id: thought.strategy_id,
            trade_id: thought.trade_id,
            outcome: None,
            reflection: None,
        };
        let id = entry.id;

        match serde_json::to_value(&entry) {
            Ok(value) => {
                if let Err(e) = self
                    .storage
                    .store_item(collections::THOUGHTS, &id.to_string(), value, None)
                    .await
                {
                    warn!(thought_id = %id, "Failed to persist thought, keeping it cached: {}", e);
                }
            }
            Err(e) => warn!(thought_id = %id, "Failed to serialize thought: {}", e),
        }

        {
            let mut recent = self.recent.write().await;
            recent.push_back(entry.clone());
            while recent.len() > self.config.recent_cache_size {
                recent.pop_front();
            }
        }

        info!(
            thought_id = %id,
            decision_type = %entry.decision_type,
            confidence = entry.confidence.value(),
            importance = entry.importance_score,
            "Recorded thought"
        );

        self.detect_and_store_patterns().await;
        Some(id)
    }

    /// Ids of up to `max_related` recent thoughts sharing enough words.
    async fn find_related(&self, text: &str) -> Vec<Uuid> {
        let words = word_set(text);
        let recent = self.recent.read().await;
        recent
            .iter()
            .rev()
            .take(self.config.related_window)
            .filter(|entry| {
                let other = word_set(&format!("{} {}", entry.decision, entry.reasoning));
                words.intersection(&other).count() >= self.config.related_min_shared_words
            })
            .map(|entry| entry.id)
            .take(self.config.max_related)
            .collect()
    }

    async fn detect_and_store_patterns(&self) {
        let entries: Vec<ThoughtEntry> = self.recent.read().await.iter().cloned().collect();
        let detected = detect_patterns(&entries, &self.config);

        for pattern in detected {
            // Only record a pattern when it differs from the last one of its type
            let repeated = self
                .patterns
                .read()
                .await
                .iter()
                .rev()
                .find(|p| p.pattern_type == pattern.pattern_type)
                .is_some_and(|p| p.description == pattern.description);
            if repeated {
                continue;
            }

            info!(
                pattern = ?pattern.pattern_type,
                description = %pattern.description,
                strength = pattern.strength,
                "Detected thought pattern"
            );

            match serde_json::to_value(&pattern) {
                Ok(value) => {
                    if let Err(e) = self
                        .storage
                        .store_item(collections::THOUGHT_PATTERNS, &pattern.id.to_string(), value, None)
                        .await
                    {
                        warn!("Failed to persist thought pattern: {}", e);
                    }
                }
                Err(e) => warn!("Failed to serialize thought pattern: {}", e),
            }

            let mut patterns = self.patterns.write().await;
            patterns.push_back(pattern);
            while patterns.len() > MAX_CACHED_PATTERNS {
                patterns.pop_front();
            }
        }
    }

    /// Attach an outcome and optional reflection. Repeating the same update
    /// leaves the entry unchanged.
    pub async fn update_thought_outcome(
        &self,
        id: Uuid,
        outcome: &str,
        reflection: Option<&str>,
    ) -> bool {
        let cached = {
            let mut recent = self.recent.write().await;
            match recent.iter_mut().find(|e| e.id == id) {
                Some(entry) => {
                    entry.outcome = Some(outcome.to_string());
                    if let Some(text) = reflection {
                        entry.reflection = Some(text.to_string());
                    }
                    true
                }
                None => false,
            }
        };

        let mut patch = json!({ "outcome": outcome });
        if let Some(text) = reflection {
            patch["reflection"] = json!(text);
        }

        let stored = match self
            .storage
            .update_item(collections::THOUGHTS, &id.to_string(), patch)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(thought_id = %id, "Failed to persist thought outcome: {}", e);
                false
            }
        };

        if cached || stored {
            debug!(thought_id = %id, outcome, "Updated thought outcome");
        }
        cached || stored
    }

    pub async fn get_thought(&self, id: Uuid) -> Option<ThoughtEntry> {
        if let Some(entry) = self.recent.read().await.iter().find(|e| e.id == id) {
            return Some(entry.clone());
        }
        match self
            .storage
            .get_item(collections::THOUGHTS, &id.to_string())
            .await
        {
            Ok(Some(doc)) => parse_entries(vec![doc]).pop(),
            Ok(None) => None,
            Err(e) => {
                warn!(thought_id = %id, "Failed to load thought: {}", e);
                None
            }
        }
    }

    /// Thoughts from the last `hours`, newest first.
    pub async fn get_recent_thoughts(&self, hours: i64, limit: usize) -> Vec<ThoughtEntry> {
        let cutoff = window_start(Utc::now(), Duration::try_hours(hours.max(0)));
        let query = Query::new()
            .filter(Filter::gte("timestamp", cutoff.to_rfc3339()))
            .order_by("timestamp", SortDirection::Descending)
            .limit(limit);

        match self
            .storage
            .query_collection(collections::THOUGHTS, &query)
            .await
        {
            Ok(documents) => parse_entries(documents),
            Err(e) => {
                warn!("Falling back to cached thoughts: {}", e);
                self.cached_matching(|entry| entry.timestamp >= cutoff, limit)
                    .await
            }
        }
    }

    pub async fn search_thoughts(&self, search: ThoughtQuery) -> Vec<ThoughtEntry> {
        let mut query = Query::new().order_by("timestamp", SortDirection::Descending);
        if let Some(decision_type) = search.decision_type {
            query = query.filter(Filter::eq("decision_type", decision_type.as_str()));
        }
        if let Some(state) = search.emotional_state {
            query = query.filter(Filter::eq("emotional_state", state.as_str()));
        }
        if let Some((low, high)) = search.confidence_range {
            query = query
                .filter(Filter::gte("confidence", u8::from(low)))
                .filter(Filter::lte("confidence", u8::from(high)));
        }
        if let Some((start, end)) = search.date_range {
            query = query
                .filter(Filter::gte("timestamp", start.to_rfc3339()))
                .filter(Filter::lt("timestamp", end.to_rfc3339()));
        }
        // Text matching happens here, so the limit must too
        if search.query.is_none() {
            if let Some(limit) = search.limit {
                query = query.limit(limit);
            }
        }

        let limit = search.limit.unwrap_or(usize::MAX);
        match self
            .storage
            .query_collection(collections::THOUGHTS, &query)
            .await
        {
            Ok(documents) => parse_entries(documents)
                .into_iter()
                .filter(|entry| search.matches(entry))
                .take(limit)
                .collect(),
            Err(e) => {
                warn!("Falling back to cached thoughts for search: {}", e);
                self.cached_matching(|entry| search.matches(entry), limit)
                    .await
            }
        }
    }

    /// Thoughts flagged for follow-up that still have no outcome.
    pub async fn get_thoughts_requiring_followup(&self) -> Vec<ThoughtEntry> {
        let query = Query::new()
            .filter(Filter::eq("follow_up_required", true))
            .filter(Filter::eq("outcome", Value::Null))
            .order_by("timestamp", SortDirection::Descending);

        match self
            .storage
            .query_collection(collections::THOUGHTS, &query)
            .await
        {
            Ok(documents) => parse_entries(documents),
            Err(e) => {
                warn!("Falling back to cached follow-ups: {}", e);
                self.cached_matching(ThoughtEntry::is_pending_follow_up, usize::MAX)
                    .await
            }
        }
    }

    async fn cached_matching<F>(&self, predicate: F, limit: usize) -> Vec<ThoughtEntry>
    where
        F: Fn(&ThoughtEntry) -> bool,
    {
        self.recent
            .read()
            .await
            .iter()
            .rev()
            .filter(|&entry| predicate(entry))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Export every thought of one UTC calendar day as a single archive.
    pub async fn archive_daily_thoughts(&self, date: NaiveDate) -> bool {
        let start: DateTime<Utc> = date.and_time(chrono::NaiveTime::MIN).and_utc();
        let end = start + Duration::days(1);
        let date_key = date.format("%Y-%m-%d").to_string();

        let query = Query::new()
            .filter(Filter::gte("timestamp", start.to_rfc3339()))
            .filter(Filter::lt("timestamp", end.to_rfc3339()))
            .order_by("timestamp", SortDirection::Ascending);

        let items = match self
            .storage
            .query_collection(collections::THOUGHTS, &query)
            .await
        {
            Ok(items) => items,
            Err(e) => {
                warn!(date = %date_key, "Failed to collect thoughts for archival: {}", e);
                return false;
            }
        };

        if items.is_empty() {
            debug!(date = %date_key, "No thoughts to archive");
            return true;
        }

        match self.storage.store_archive(&items, &date_key).await {
            Ok(()) => {
                info!(date = %date_key, count = items.len(), "Archived thoughts");
                true
            }
            Err(e) => {
                warn!(date = %date_key, "Failed to archive thoughts: {}", e);
                false
            }
        }
    }

    pub async fn recent_patterns(&self) -> Vec<ThoughtPattern> {
        self.patterns.read().await.iter().cloned().collect()
    }

    /// Most recent cached entries, newest first.
    pub async fn cached_thoughts(&self, limit: usize) -> Vec<ThoughtEntry> {
        self.cached_matching(|_| true, limit).await
    }

    pub async fn statistics(&self) -> JournalStatistics {
        let recent = self.recent.read().await;
        let mut by_type: BTreeMap<DecisionType, usize> = BTreeMap::new();
        for entry in recent.iter() {
            *by_type.entry(entry.decision_type).or_default() += 1;
        }

        let average_confidence = if recent.is_empty() {
            0.0
        } else {
            recent.iter().map(|e| e.confidence.value()).sum::<f64>() / recent.len() as f64
        };

        JournalStatistics {
            cached_thoughts: recent.len(),
            by_type,
            pending_follow_ups: recent.iter().filter(|e| e.is_pending_follow_up()).count(),
            average_confidence,
            patterns_detected: self.patterns.read().await.len(),
        }
    }

    pub async fn clear_cache(&self) {
        self.recent.write().await.clear();
        self.patterns.write().await.clear();
        debug!("Cleared journal cache");
    }

    pub async fn health_check(&self) -> bool {
        match self
            .storage
            .query_collection(collections::THOUGHTS, &Query::new().limit(1))
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!("Journal health check failed: {}", e);
                false
            }
        }
    }
}
