use super::strength;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    Working,
    ShortTerm,
    LongTerm,
    Episodic,
}

impl MemoryTier {
    pub const ALL: [MemoryTier; 4] = [
        MemoryTier::Working,
        MemoryTier::ShortTerm,
        MemoryTier::LongTerm,
        MemoryTier::Episodic,
    ];

    /// Tiers that live only in the backing store. Long-term is listed before
    /// short-term so a consolidated copy shadows a stale short-term one.
    pub const PERSISTED: [MemoryTier; 3] = [
        MemoryTier::LongTerm,
        MemoryTier::Episodic,
        MemoryTier::ShortTerm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryTier::Working => "working",
            MemoryTier::ShortTerm => "short_term",
            MemoryTier::LongTerm => "long_term",
            MemoryTier::Episodic => "episodic",
        }
    }

    /// Storage collection holding this tier.
    pub fn collection(&self) -> &'static str {
        match self {
            MemoryTier::Working => "memories_working",
            MemoryTier::ShortTerm => "memories_short_term",
            MemoryTier::LongTerm => "memories_long_term",
            MemoryTier::Episodic => "memories_episodic",
        }
    }

    /// Working and short-term items can be forgotten; the others persist.
    pub fn is_volatile(&self) -> bool {
        matches!(self, MemoryTier::Working | MemoryTier::ShortTerm)
    }
}

impl fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "working" => Ok(MemoryTier::Working),
            "short_term" => Ok(MemoryTier::ShortTerm),
            "long_term" => Ok(MemoryTier::LongTerm),
            "episodic" => Ok(MemoryTier::Episodic),
            _ => Err(format!("Invalid memory tier: {s}")),
        }
    }
}

/// Importance of a memory, serialized as its numeric level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ImportanceLevel {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl ImportanceLevel {
    pub fn value(self) -> f64 {
        self as u8 as f64
    }
}

impl From<ImportanceLevel> for u8 {
    fn from(level: ImportanceLevel) -> Self {
        level as u8
    }
}

impl TryFrom<u8> for ImportanceLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ImportanceLevel::Low),
            2 => Ok(ImportanceLevel::Medium),
            3 => Ok(ImportanceLevel::High),
            4 => Ok(ImportanceLevel::Critical),
            _ => Err(format!("Importance level must be 1..=4, got {value}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: Uuid,
    pub content: String,
    pub tier: MemoryTier,
    pub importance: ImportanceLevel,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub decay_rate: f64,
    #[serde(default)]
    pub associations: BTreeSet<Uuid>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl MemoryItem {
    pub fn new(request: StoreMemoryRequest, decay_rate: f64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            content: request.content,
            tier: request.tier,
            importance: request.importance,
            created_at: now,
            last_accessed: now,
            decay_rate,
            associations: BTreeSet::new(),
            tags: request.tags.into_iter().collect(),
            metadata: request.metadata,
        }
    }

    pub fn current_strength(&self, now: DateTime<Utc>) -> f64 {
        strength::current_strength(
            self.importance.value(),
            self.decay_rate,
            self.created_at,
            self.last_accessed,
            now,
        )
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_accessed = now;
    }

    /// Move the item to another tier, adopting that tier's decay rate.
    pub fn move_to(&mut self, tier: MemoryTier, decay_rate: f64) {
        self.tier = tier;
        self.decay_rate = decay_rate;
    }

    pub fn shares_tag(&self, tags: &[String]) -> bool {
        tags.is_empty() || tags.iter().any(|t| self.tags.contains(t))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StoreMemoryRequest {
    #[validate(length(min = 1, max = 10000, message = "Content must be between 1 and 10000 characters"))]
    pub content: String,
    pub tier: MemoryTier,
    pub importance: ImportanceLevel,
    #[serde(default)]
    #[validate(length(max = 50, message = "At most 50 tags per memory"))]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl StoreMemoryRequest {
    pub fn new(content: impl Into<String>, tier: MemoryTier, importance: ImportanceLevel) -> Self {
        Self {
            content: content.into(),
            tier,
            importance,
            tags: Vec::new(),
            metadata: Map::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Case-insensitive substring; empty matches everything
    pub query: String,
    pub tier: Option<MemoryTier>,
    /// Items must share at least one of these tags
    #[serde(default)]
    pub tags: Vec<String>,
    pub limit: usize,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            tier: None,
            tags: Vec::new(),
            limit: 10,
        }
    }

    pub fn in_tier(mut self, tier: MemoryTier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsolidationReport {
    pub started_at: Option<DateTime<Utc>>,
    /// Short-term copies dropped because a long-term copy already exists
    pub reconciled: usize,
    pub expired: usize,
    pub promoted: usize,
    pub evicted: usize,
    pub snapshot_written: bool,
    /// The pass was skipped by the rate limiter
    pub skipped: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStatistics {
    pub tier_counts: BTreeMap<MemoryTier, usize>,
    pub working_cache_size: usize,
    pub working_capacity: usize,
    pub association_links: usize,
    pub last_consolidation: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_importance_serializes_as_integer() {
        assert_eq!(serde_json::to_value(ImportanceLevel::High).unwrap(), 3);
        let parsed: ImportanceLevel = serde_json::from_value(serde_json::json!(4)).unwrap();
        assert_eq!(parsed, ImportanceLevel::Critical);
        assert!(serde_json::from_value::<ImportanceLevel>(serde_json::json!(5)).is_err());
    }

    #[test]
    fn test_tier_parsing_and_collections() {
        assert_eq!("short_term".parse::<MemoryTier>().unwrap(), MemoryTier::ShortTerm);
        assert!("warm".parse::<MemoryTier>().is_err());
        assert_eq!(MemoryTier::Episodic.collection(), "memories_episodic");
        assert!(MemoryTier::Working.is_volatile());
        assert!(!MemoryTier::LongTerm.is_volatile());
    }

    #[test]
    fn test_empty_content_fails_validation() {
        let request = StoreMemoryRequest::new("", MemoryTier::Working, ImportanceLevel::Low);
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_tag_matching() {
        let request = StoreMemoryRequest::new("btc breakout", MemoryTier::Working, ImportanceLevel::Low)
            .with_tags(["btc", "breakout"]);
        let item = MemoryItem::new(request, 0.1);
        assert!(item.shares_tag(&[]));
        assert!(item.shares_tag(&["eth".to_string(), "btc".to_string()]));
        assert!(!item.shares_tag(&["eth".to_string()]));
    }
}
