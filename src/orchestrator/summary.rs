use super::CognitiveOrchestrator;
use crate::journal::{JournalStatistics, ThoughtPattern};
use crate::memory::MemoryStatistics;
use crate::metacognition::{BiasDetection, LearningMetric};
use crate::state::{CognitiveState, StateStatistics, StateTransition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const SUMMARY_ITEMS: usize = 5;

/// Point-in-time report across every subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CognitiveSummary {
    pub generated_at: DateTime<Utc>,
    pub current_state: CognitiveState,
    pub state_context: Map<String, Value>,
    pub state: StateStatistics,
    pub recent_transitions: Vec<StateTransition>,
    pub memory: MemoryStatistics,
    pub journal: JournalStatistics,
    pub recent_patterns: Vec<ThoughtPattern>,
    pub recent_biases: Vec<BiasDetection>,
    pub learning: Vec<LearningMetric>,
    pub background_processing: bool,
    pub minimal_mode: bool,
}

impl CognitiveOrchestrator {
    pub async fn get_cognitive_summary(&self) -> CognitiveSummary {
        let mut recent_patterns = self.journal.recent_patterns().await;
        let keep_from = recent_patterns.len().saturating_sub(SUMMARY_ITEMS);
        recent_patterns.drain(..keep_from);

        CognitiveSummary {
            generated_at: Utc::now(),
            current_state: self.state.current_state().await,
            state_context: self.state.state_context().await,
            state: self.state.state_statistics().await,
            recent_transitions: self.state.get_state_history(SUMMARY_ITEMS).await,
            memory: self.memory.statistics().await,
            journal: self.journal.statistics().await,
            recent_patterns,
            recent_biases: self.metacognition.recent_biases(SUMMARY_ITEMS).await,
            learning: self.metacognition.latest_learning_metrics().await,
            background_processing: self.is_background_running().await,
            minimal_mode: self.is_minimal_mode(),
        }
    }
}
