use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CognitiveState {
    Initializing,
    Observing,
    Analyzing,
    Executing,
    Reflecting,
    Emergency,
    Maintenance,
}

impl CognitiveState {
    pub const ALL: [CognitiveState; 7] = [
        CognitiveState::Initializing,
        CognitiveState::Observing,
        CognitiveState::Analyzing,
        CognitiveState::Executing,
        CognitiveState::Reflecting,
        CognitiveState::Emergency,
        CognitiveState::Maintenance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CognitiveState::Initializing => "initializing",
            CognitiveState::Observing => "observing",
            CognitiveState::Analyzing => "analyzing",
            CognitiveState::Executing => "executing",
            CognitiveState::Reflecting => "reflecting",
            CognitiveState::Emergency => "emergency",
            CognitiveState::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for CognitiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CognitiveState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CognitiveState::ALL
            .into_iter()
            .find(|state| state.as_str() == s.to_lowercase())
            .ok_or_else(|| format!("Unknown cognitive state: {s}"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDefinition {
    pub state: CognitiveState,
    /// Seconds the agent may stay in this state; `None` means unbounded
    pub max_duration_seconds: Option<u64>,
    pub allowed_transitions: Vec<CognitiveState>,
    #[serde(default)]
    pub entry_actions: Vec<String>,
    #[serde(default)]
    pub exit_actions: Vec<String>,
    #[serde(default)]
    pub periodic_actions: Vec<String>,
    pub timeout_transition: Option<CognitiveState>,
}

/// The persisted singleton describing the current mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub current_state: CognitiveState,
    pub state_entry_time: DateTime<Utc>,
    pub previous_state: Option<CognitiveState>,
    #[serde(default)]
    pub state_context: Map<String, Value>,
}

impl StateRecord {
    pub fn initial() -> Self {
        Self {
            current_state: CognitiveState::Initializing,
            state_entry_time: Utc::now(),
            previous_state: None,
            state_context: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub id: Uuid,
    pub from_state: CognitiveState,
    pub to_state: CognitiveState,
    pub trigger: String,
    pub timestamp: DateTime<Utc>,
    /// Time spent in `from_state`
    pub duration_seconds: f64,
    #[serde(default)]
    pub context: Map<String, Value>,
    pub reason: String,
    pub confidence: f64,
    pub success: bool,
    pub forced: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub checked_at: DateTime<Utc>,
    pub state: CognitiveState,
    pub time_in_state_seconds: f64,
    pub issues: Vec<String>,
    /// State after any corrective transition
    pub corrected_to: Option<CognitiveState>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateStatistics {
    pub current_state: CognitiveState,
    pub time_in_state_seconds: f64,
    pub visits: BTreeMap<CognitiveState, usize>,
    pub mean_duration_seconds: BTreeMap<CognitiveState, f64>,
    pub transitions_considered: usize,
    pub forced_transitions: usize,
    pub rejected_transitions: u64,
}
