use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

/// Self-reported confidence, serialized as 1..=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ConfidenceLevel {
    VeryLow = 1,
    Low = 2,
    Medium = 3,
    High = 4,
    VeryHigh = 5,
}

impl ConfidenceLevel {
    pub fn value(self) -> f64 {
        self as u8 as f64
    }

    /// Map a 0–1 probability onto the five levels.
    pub fn from_probability(p: f64) -> Self {
        match p {
            p if p >= 0.9 => ConfidenceLevel::VeryHigh,
            p if p >= 0.7 => ConfidenceLevel::High,
            p if p >= 0.5 => ConfidenceLevel::Medium,
            p if p >= 0.3 => ConfidenceLevel::Low,
            _ => ConfidenceLevel::VeryLow,
        }
    }
}

impl From<ConfidenceLevel> for u8 {
    fn from(level: ConfidenceLevel) -> Self {
        level as u8
    }
}

impl TryFrom<u8> for ConfidenceLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ConfidenceLevel::VeryLow),
            2 => Ok(ConfidenceLevel::Low),
            3 => Ok(ConfidenceLevel::Medium),
            4 => Ok(ConfidenceLevel::High),
            5 => Ok(ConfidenceLevel::VeryHigh),
            _ => Err(format!("Confidence level must be 1..=5, got {value}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmotionalState {
    #[default]
    Neutral,
    Confident,
    Cautious,
    Anxious,
    Excited,
    Frustrated,
    Fearful,
    Greedy,
}

impl EmotionalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmotionalState::Neutral => "neutral",
            EmotionalState::Confident => "confident",
            EmotionalState::Cautious => "cautious",
            EmotionalState::Anxious => "anxious",
            EmotionalState::Excited => "excited",
            EmotionalState::Frustrated => "frustrated",
            EmotionalState::Fearful => "fearful",
            EmotionalState::Greedy => "greedy",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    TradeEntry,
    TradeExit,
    StrategySelection,
    RiskAssessment,
    MarketAnalysis,
    PerformanceReview,
    Learning,
    Metacognitive,
}

impl DecisionType {
    pub const ALL: [DecisionType; 8] = [
        DecisionType::TradeEntry,
        DecisionType::TradeExit,
        DecisionType::StrategySelection,
        DecisionType::RiskAssessment,
        DecisionType::MarketAnalysis,
        DecisionType::PerformanceReview,
        DecisionType::Learning,
        DecisionType::Metacognitive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionType::TradeEntry => "trade_entry",
            DecisionType::TradeExit => "trade_exit",
            DecisionType::StrategySelection => "strategy_selection",
            DecisionType::RiskAssessment => "risk_assessment",
            DecisionType::MarketAnalysis => "market_analysis",
            DecisionType::PerformanceReview => "performance_review",
            DecisionType::Learning => "learning",
            DecisionType::Metacognitive => "metacognitive",
        }
    }

    /// Weight of this decision type in the importance score.
    pub fn weight(&self) -> f64 {
        match self {
            DecisionType::TradeEntry | DecisionType::TradeExit | DecisionType::PerformanceReview => 1.0,
            DecisionType::StrategySelection | DecisionType::RiskAssessment => 0.9,
            DecisionType::Learning => 0.8,
            DecisionType::Metacognitive => 0.7,
            DecisionType::MarketAnalysis => 0.6,
        }
    }

    /// Decisions of this type always get a follow-up.
    pub fn requires_follow_up(&self) -> bool {
        matches!(
            self,
            DecisionType::TradeEntry | DecisionType::StrategySelection | DecisionType::RiskAssessment
        )
    }
}

impl fmt::Display for DecisionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DecisionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DecisionType::ALL
            .into_iter()
            .find(|t| t.as_str() == s.to_lowercase())
            .ok_or_else(|| format!("Invalid decision type: {s}"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThoughtEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub decision: String,
    pub reasoning: String,
    pub confidence: ConfidenceLevel,
    pub emotional_state: EmotionalState,
    #[serde(default)]
    pub market_context: Map<String, Value>,
    pub decision_type: DecisionType,
    pub importance_score: f64,
    pub follow_up_required: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub related_thoughts: Vec<Uuid>,
    pub strategy_id: Option<String>,
    pub trade_id: Option<String>,
    pub outcome: Option<String>,
    pub reflection: Option<String>,
}

impl ThoughtEntry {
    pub fn importance_for(decision_type: DecisionType, confidence: ConfidenceLevel) -> f64 {
        decision_type.weight() * (0.5 + confidence.value() / 5.0)
    }

    pub fn needs_follow_up(decision_type: DecisionType, confidence: ConfidenceLevel) -> bool {
        decision_type.requires_follow_up() || confidence <= ConfidenceLevel::Low
    }

    pub fn is_pending_follow_up(&self) -> bool {
        self.follow_up_required && self.outcome.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewThought {
    #[validate(length(min = 1, max = 2000, message = "Decision must be between 1 and 2000 characters"))]
    pub decision: String,
    #[validate(length(max = 20000))]
    pub reasoning: String,
    pub confidence: ConfidenceLevel,
    pub decision_type: DecisionType,
    #[serde(default)]
    pub emotional_state: EmotionalState,
    #[serde(default)]
    pub market_context: Map<String, Value>,
    #[serde(default)]
    #[validate(length(max = 50))]
    pub tags: Vec<String>,
    pub strategy_id: Option<String>,
    pub trade_id: Option<String>,
}

impl NewThought {
    pub fn new(
        decision: impl Into<String>,
        reasoning: impl Into<String>,
        confidence: ConfidenceLevel,
        decision_type: DecisionType,
    ) -> Self {
        Self {
            decision: decision.into(),
            reasoning: reasoning.into(),
            confidence,
            decision_type,
            emotional_state: EmotionalState::Neutral,
            market_context: Map::new(),
            tags: Vec::new(),
            strategy_id: None,
            trade_id: None,
        }
    }

    pub fn with_emotion(mut self, state: EmotionalState) -> Self {
        self.emotional_state = state;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.market_context.insert(key.into(), value.into());
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

    pub fn with_strategy(mut self, strategy_id: impl Into<String>) -> Self {
        self.strategy_id = Some(strategy_id.into());
        self
    }

    pub fn with_trade(mut self, trade_id: impl Into<String>) -> Self {
        self.trade_id = Some(trade_id.into());
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThoughtQuery {
    /// Case-insensitive substring of decision or reasoning
    pub query: Option<String>,
    pub decision_type: Option<DecisionType>,
    pub emotional_state: Option<EmotionalState>,
    /// Inclusive bounds
    pub confidence_range: Option<(ConfidenceLevel, ConfidenceLevel)>,
    /// Inclusive start, exclusive end
    pub date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub limit: Option<usize>,
}

impl ThoughtQuery {
    pub fn matches(&self, entry: &ThoughtEntry) -> bool {
        if let Some(text) = &self.query {
            let needle = text.to_lowercase();
            if !entry.decision.to_lowercase().contains(&needle)
                && !entry.reasoning.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        if self.decision_type.is_some_and(|t| t != entry.decision_type) {
            return false;
        }
        if self.emotional_state.is_some_and(|s| s != entry.emotional_state) {
            return false;
        }
        if let Some((low, high)) = self.confidence_range {
            if entry.confidence < low || entry.confidence > high {
                return false;
            }
        }
        if let Some((start, end)) = self.date_range {
            if entry.timestamp < start || entry.timestamp >= end {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    ConfidenceTrend,
    DecisionTypeBias,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThoughtPattern {
    pub id: Uuid,
    pub pattern_type: PatternType,
    pub description: String,
    pub strength: f64,
    pub supporting_thoughts: Vec<Uuid>,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalStatistics {
    pub cached_thoughts: usize,
    pub by_type: BTreeMap<DecisionType, usize>,
    pub pending_follow_ups: usize,
    pub average_confidence: f64,
    pub patterns_detected: usize,
}
