use crate::journal::DecisionType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    Success,
    Failure,
    PartialSuccess,
    Pending,
    Cancelled,
}

impl DecisionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionOutcome::Success => "success",
            DecisionOutcome::Failure => "failure",
            DecisionOutcome::PartialSuccess => "partial_success",
            DecisionOutcome::Pending => "pending",
            DecisionOutcome::Cancelled => "cancelled",
        }
    }

    /// Numeric value of the outcome used by accuracy and calibration.
    pub fn value(self) -> f64 {
        match self {
            DecisionOutcome::Success => 1.0,
            DecisionOutcome::PartialSuccess => 0.6,
            DecisionOutcome::Pending => 0.5,
            DecisionOutcome::Cancelled => 0.3,
            DecisionOutcome::Failure => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiasType {
    Overconfidence,
    Confirmation,
    Anchoring,
    Availability,
    LossAversion,
    Recency,
    PatternSeeking,
    Overtrading,
}

impl BiasType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BiasType::Overconfidence => "overconfidence",
            BiasType::Confirmation => "confirmation",
            BiasType::Anchoring => "anchoring",
            BiasType::Availability => "availability",
            BiasType::LossAversion => "loss_aversion",
            BiasType::Recency => "recency",
            BiasType::PatternSeeking => "pattern_seeking",
            BiasType::Overtrading => "overtrading",
        }
    }

    pub fn mitigation_suggestions(&self) -> Vec<String> {
        let suggestions: &[&str] = match self {
            BiasType::Overconfidence => &[
                "Scale position size with realised accuracy, not conviction",
                "Require a written counter-argument before high-confidence entries",
                "Review the calibration of recent high-confidence decisions weekly",
            ],
            BiasType::Confirmation => &[
                "Evaluate at least one alternative strategy for each market regime",
                "Actively look for evidence against the current market view",
                "Rotate strategies when one dominates a sentiment regime",
            ],
            BiasType::Anchoring => &[
                "Re-derive targets from current data instead of entry prices",
                "Reset reference levels after significant market moves",
            ],
            BiasType::Availability => &[
                "Weight decisions by base rates rather than memorable trades",
                "Consult the full decision history before acting on a recent example",
            ],
            BiasType::LossAversion => &[
                "Honour pre-defined stop-losses",
                "Set maximum holding times for losing positions",
                "Judge exits on forward expectancy, not entry price",
            ],
            BiasType::Recency => &[
                "Compare recent results with the longer-term record before adjusting",
                "Avoid changing confidence after a short streak",
            ],
            BiasType::PatternSeeking => &[
                "Confirm technical patterns with fundamental data",
                "Track the hit rate of each pattern before trusting it",
            ],
            BiasType::Overtrading => &[
                "Enforce a cooldown between trades",
                "Only trade setups that meet every entry criterion",
                "Set a daily decision budget",
            ],
        };
        suggestions.iter().map(|s| s.to_string()).collect()
    }
}

impl fmt::Display for BiasType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningType {
    StrategyImprovement,
    RiskManagement,
    MarketAnalysis,
    DecisionMaking,
}

impl From<DecisionType> for LearningType {
    fn from(decision_type: DecisionType) -> Self {
        match decision_type {
            DecisionType::StrategySelection => LearningType::StrategyImprovement,
            DecisionType::RiskAssessment => LearningType::RiskManagement,
            DecisionType::MarketAnalysis => LearningType::MarketAnalysis,
            DecisionType::TradeEntry
            | DecisionType::TradeExit
            | DecisionType::PerformanceReview
            | DecisionType::Learning
            | DecisionType::Metacognitive => LearningType::DecisionMaking,
        }
    }
}

/// A completed (or abandoned) decision submitted for review.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DecisionReport {
    pub decision_id: Uuid,
    pub decision_type: DecisionType,
    #[validate(range(min = 0.0, max = 1.0, message = "Confidence must be between 0.0 and 1.0"))]
    pub initial_confidence: f64,
    pub actual_outcome: DecisionOutcome,
    #[validate(range(min = 0.0, max = 1.0))]
    pub outcome_confidence: f64,
    pub profit_loss: Option<f64>,
    pub strategy_used: Option<String>,
    #[serde(default)]
    pub market_context: Map<String, Value>,
    /// Minutes between the decision and its outcome
    pub time_to_outcome: Option<f64>,
}

impl DecisionReport {
    pub fn new(
        decision_id: Uuid,
        decision_type: DecisionType,
        initial_confidence: f64,
        actual_outcome: DecisionOutcome,
    ) -> Self {
        Self {
            decision_id,
            decision_type,
            initial_confidence,
            actual_outcome,
            outcome_confidence: 1.0,
            profit_loss: None,
            strategy_used: None,
            market_context: Map::new(),
            time_to_outcome: None,
        }
    }

    pub fn with_pnl(mut self, pnl: f64) -> Self {
        self.profit_loss = Some(pnl);
        self
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy_used = Some(strategy.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.market_context.insert(key.into(), value.into());
        self
    }

    pub fn with_time_to_outcome(mut self, minutes: f64) -> Self {
        self.time_to_outcome = Some(minutes);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionAnalysis {
    pub id: Uuid,
    pub decision_id: Uuid,
    pub decision_type: DecisionType,
    pub initial_confidence: f64,
    pub actual_outcome: DecisionOutcome,
    pub outcome_confidence: f64,
    pub profit_loss: Option<f64>,
    pub strategy_used: Option<String>,
    pub accuracy_score: f64,
    pub bias_indicators: Vec<BiasType>,
    pub learning_opportunities: Vec<String>,
    #[serde(default)]
    pub market_context: Map<String, Value>,
    pub time_to_outcome: Option<f64>,
    pub analyzed_at: DateTime<Utc>,
}

impl DecisionAnalysis {
    /// |confidence − outcome value|
    pub fn calibration_error(&self) -> f64 {
        (self.initial_confidence - self.actual_outcome.value()).abs()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiasDetection {
    pub id: Uuid,
    pub bias_type: BiasType,
    pub confidence: f64,
    pub severity: f64,
    pub evidence: Vec<String>,
    pub related_decisions: Vec<Uuid>,
    pub mitigation_suggestions: Vec<String>,
    pub detected_at: DateTime<Utc>,
}

impl BiasDetection {
    /// Build a detection from a raw score.
    pub fn from_score(
        bias_type: BiasType,
        score: f64,
        evidence: Vec<String>,
        related_decisions: Vec<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            bias_type,
            confidence: score.min(1.0),
            severity: (score * 2.0).min(1.0),
            evidence,
            related_decisions,
            mitigation_suggestions: bias_type.mitigation_suggestions(),
            detected_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningMetric {
    pub id: Uuid,
    pub learning_type: LearningType,
    /// 0–10
    pub skill_level: f64,
    /// Slope of skill per sample
    pub improvement_rate: f64,
    /// 0–1
    pub confidence_calibration: f64,
    pub key_learnings: Vec<String>,
    pub areas_for_improvement: Vec<String>,
    pub sample_size: usize,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceAttribution {
    pub id: Uuid,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_pnl: f64,
    pub strategy_pnl: BTreeMap<String, f64>,
    pub market_condition_pnl: BTreeMap<String, f64>,
    pub skill_attribution: f64,
    pub luck_attribution: f64,
    pub bias_impact: f64,
    pub decision_quality_score: f64,
    pub confidence_accuracy: f64,
    pub decision_count: usize,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttributionReport {
    Generated(PerformanceAttribution),
    InsufficientData {
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    },
}

/// Result of analysing one decision, including any systematic biases the
/// new analysis surfaced.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub analysis_id: Uuid,
    pub new_biases: Vec<BiasDetection>,
}
