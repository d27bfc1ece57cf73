use super::models::{CognitiveState, StateDefinition};
use crate::error::{CognitiveError, Result};
use std::collections::HashMap;
use std::time::Duration;

/// Validated set of state definitions.
#[derive(Debug, Clone)]
pub struct StateTopology {
    definitions: HashMap<CognitiveState, StateDefinition>,
}

fn actions(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

fn define(
    state: CognitiveState,
    max_duration_seconds: Option<u64>,
    allowed_transitions: &[CognitiveState],
    timeout_transition: Option<CognitiveState>,
    entry: &[&str],
    exit: &[&str],
    periodic: &[&str],
) -> StateDefinition {
    StateDefinition {
        state,
        max_duration_seconds,
        allowed_transitions: allowed_transitions.to_vec(),
        entry_actions: actions(entry),
        exit_actions: actions(exit),
        periodic_actions: actions(periodic),
        timeout_transition,
    }
}

impl StateTopology {
    pub fn default_definitions() -> Vec<StateDefinition> {
        use CognitiveState::*;

        vec![
            define(
                Initializing,
                Some(300),
                &[Observing, Emergency, Maintenance],
                Some(Emergency),
                &["load_persisted_state", "run_health_checks"],
                &["log_startup_complete"],
                &["check_initialization_progress"],
            ),
            define(
                Observing,
                None,
                &[Analyzing, Reflecting, Emergency, Maintenance],
                None,
                &["resume_market_monitoring"],
                &[],
                &["scan_for_opportunities"],
            ),
            define(
                Analyzing,
                Some(600),
                &[Executing, Observing, Emergency],
                Some(Observing),
                &["gather_market_context"],
                &["record_analysis_summary"],
                &[],
            ),
            define(
                Executing,
                Some(300),
                &[Observing, Reflecting, Emergency],
                Some(Emergency),
                &["lock_risk_limits"],
                &["release_risk_limits"],
                &["monitor_order_status"],
            ),
            define(
                Reflecting,
                Some(900),
                &[Observing, Analyzing, Emergency, Maintenance],
                Some(Observing),
                &["collect_recent_outcomes"],
                &["store_lessons_learned"],
                &[],
            ),
            define(
                Emergency,
                Some(1800),
                &[Observing, Maintenance],
                Some(Maintenance),
                &["halt_new_positions", "alert_operator"],
                &["log_emergency_resolution"],
                &["check_recovery_conditions"],
            ),
            define(
                Maintenance,
                Some(3600),
                &[Initializing],
                Some(Initializing),
                &["flush_caches"],
                &[],
                &["run_consolidation"],
            ),
        ]
    }

    /// Every state defined exactly once, non-empty allowed sets and timeout
    /// targets inside the allowed set.
    pub fn from_definitions(definitions: Vec<StateDefinition>) -> Result<Self> {
        let mut by_state = HashMap::new();
        for definition in definitions {
            if definition.allowed_transitions.is_empty() {
                return Err(CognitiveError::Configuration(format!(
                    "State {} has no allowed transitions",
                    definition.state
                )));
            }
            if let Some(target) = definition.timeout_transition {
                if !definition.allowed_transitions.contains(&target) {
                    return Err(CognitiveError::Configuration(format!(
                        "Timeout transition {} -> {} is not an allowed transition",
                        definition.state, target
                    )));
                }
            }
            if definition.max_duration_seconds == Some(0) {
                return Err(CognitiveError::Configuration(format!(
                    "State {} has a zero max duration",
                    definition.state
                )));
            }
            let state = definition.state;
            if by_state.insert(state, definition).is_some() {
                return Err(CognitiveError::Configuration(format!(
                    "State {state} is defined more than once"
                )));
            }
        }

        if let Some(missing) = CognitiveState::ALL
            .iter()
            .find(|state| !by_state.contains_key(*state))
        {
            return Err(CognitiveError::Configuration(format!(
                "State {missing} is not defined"
            )));
        }

        Ok(Self {
            definitions: by_state,
        })
    }

    pub fn definition(&self, state: CognitiveState) -> Option<&StateDefinition> {
        self.definitions.get(&state)
    }

    pub fn is_allowed(&self, from: CognitiveState, to: CognitiveState) -> bool {
        self.definition(from)
            .map(|d| d.allowed_transitions.contains(&to))
            .unwrap_or(false)
    }

    pub fn max_duration(&self, state: CognitiveState) -> Option<Duration> {
        self.definition(state)
            .and_then(|d| d.max_duration_seconds)
            .map(Duration::from_secs)
    }

    pub fn timeout_transition(&self, state: CognitiveState) -> Option<CognitiveState> {
        self.definition(state).and_then(|d| d.timeout_transition)
    }
}

impl Default for StateTopology {
    fn default() -> Self {
        Self {
            definitions: Self::default_definitions()
                .into_iter()
                .map(|d| (d.state, d))
                .collect(),
        }
    }
}
