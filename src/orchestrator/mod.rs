//! Facade over the cognitive subsystems, used by the trading layer.
//!
//! The orchestrator owns one instance of each subsystem sharing the injected
//! storage, wires state transitions back into the journal, and runs the
//! background maintenance worker between `start` and `shutdown`.

pub mod lifecycle;
pub mod maintenance;
pub mod summary;

pub use lifecycle::wait_for_shutdown_signal;
pub use summary::CognitiveSummary;

use crate::config::Config;
use crate::error::Result;
use crate::journal::{
    ConfidenceLevel, DecisionType, NewThought, ThoughtEntry, ThoughtJournal, ThoughtQuery,
};
use crate::memory::{
    ImportanceLevel, MemoryItem, MemoryStore, MemoryTier, SearchQuery, StoreMemoryRequest,
};
use crate::metacognition::{DecisionReport, MetacognitionEngine};
use crate::monitoring::{CognitiveMetrics, HealthChecker};
use crate::state::{CognitiveState, StateMachine};
use crate::storage::StorageBackend;
use maintenance::WorkerHandle;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug)]
pub struct CognitiveOrchestrator {
    config: Config,
    storage: Arc<dyn StorageBackend>,
    memory: Arc<MemoryStore>,
    journal: Arc<ThoughtJournal>,
    state: Arc<StateMachine>,
    metacognition: Arc<MetacognitionEngine>,
    metrics: CognitiveMetrics,
    health: HealthChecker,
    started: AtomicBool,
    shut_down: AtomicBool,
    minimal_mode: AtomicBool,
    worker: Mutex<Option<WorkerHandle>>,
}

impl CognitiveOrchestrator {
    pub fn new(config: Config, storage: Arc<dyn StorageBackend>) -> Result<Self> {
        config.validate()?;

        let memory = Arc::new(MemoryStore::new(config.memory.clone(), storage.clone()));
        let journal = Arc::new(ThoughtJournal::new(config.journal.clone(), storage.clone()));
        let state = Arc::new(StateMachine::new(config.state_machine.clone(), storage.clone())?);
        let metacognition = Arc::new(MetacognitionEngine::new(
            config.metacognition.clone(),
            storage.clone(),
        ));

        Ok(Self {
            config,
            storage,
            memory,
            journal,
            state,
            metacognition,
            metrics: CognitiveMetrics::new()?,
            health: HealthChecker::new(),
            started: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            minimal_mode: AtomicBool::new(false),
            worker: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    pub fn journal(&self) -> &ThoughtJournal {
        &self.journal
    }

    pub fn state_machine(&self) -> &StateMachine {
        &self.state
    }

    pub fn metacognition(&self) -> &MetacognitionEngine {
        &self.metacognition
    }

    pub fn metrics(&self) -> &CognitiveMetrics {
        &self.metrics
    }

    /// True when startup could not recover and the agent is parked in
    /// EMERGENCY without background processing.
    pub fn is_minimal_mode(&self) -> bool {
        self.minimal_mode.load(Ordering::SeqCst)
    }

    pub async fn is_background_running(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .is_some_and(WorkerHandle::is_running)
    }

    /// Record a thought. High-confidence thoughts and trade entries/exits
    /// are also kept in working memory.
    pub async fn record_thought(&self, thought: NewThought) -> Option<Uuid> {
        let remember = thought.confidence >= ConfidenceLevel::High
            || matches!(
                thought.decision_type,
                DecisionType::TradeEntry | DecisionType::TradeExit
            );
        let content = if thought.reasoning.is_empty() {
            thought.decision.clone()
        } else {
            format!("{}: {}", thought.decision, thought.reasoning)
        };
        let importance = if thought.confidence >= ConfidenceLevel::High {
            ImportanceLevel::High
        } else {
            ImportanceLevel::Medium
        };
        let mut tags = thought.tags.clone();
        tags.push(thought.decision_type.as_str().to_string());

        let id = self.journal.record_thought(thought).await?;
        self.metrics.thoughts_recorded_total.inc();

        if remember {
            let request = StoreMemoryRequest::new(content, MemoryTier::Working, importance)
                .with_tags(tags)
                .with_metadata("thought_id", id.to_string());
            if self.store_memory(request).await.is_none() {
                warn!(thought_id = %id, "Thought recorded but not kept in working memory");
            }
        }
        Some(id)
    }

    pub async fn store_memory(&self, request: StoreMemoryRequest) -> Option<Uuid> {
        let id = self.memory.store_memory(request).await?;
        self.metrics.memories_stored_total.inc();
        self.metrics
            .set_working_memory_items(self.memory.working_len().await);
        Some(id)
    }

    pub async fn retrieve_memory(&self, id: Uuid) -> Option<MemoryItem> {
        self.memory.retrieve_memory(id).await
    }

    pub async fn search_memories(&self, query: SearchQuery) -> Vec<MemoryItem> {
        self.memory.search_memories(query).await
    }

    /// Analyse a completed decision. Outcomes with a large P&L are also
    /// remembered as episodic memories.
    pub async fn analyze_decision(&self, report: DecisionReport) -> Option<Uuid> {
        let pnl = report.profit_loss;
        let decision_type = report.decision_type;
        let outcome = report.actual_outcome;
        let strategy = report.strategy_used.clone();

        let analysis = self.metacognition.analyze_decision_detailed(report).await?;
        self.metrics.decisions_analyzed_total.inc();
        self.metrics
            .biases_detected_total
            .inc_by(analysis.new_biases.len() as u64);

        let orchestrator = &self.config.orchestrator;
        if let Some(pnl) = pnl.filter(|p| p.abs() > orchestrator.episodic_pnl_threshold) {
            let importance =
                MemoryStore::outcome_importance(pnl, orchestrator.high_importance_pnl_threshold);
            let mut request = StoreMemoryRequest::new(
                format!(
                    "{} decision ended {} with P&L {:.2}",
                    decision_type,
                    outcome.as_str(),
                    pnl
                ),
                MemoryTier::Episodic,
                importance,
            )
            .with_tags(["decision_outcome", decision_type.as_str(), outcome.as_str()])
            .with_metadata("analysis_id", analysis.analysis_id.to_string())
            .with_metadata("profit_loss", pnl);
            if let Some(strategy) = strategy {
                request = request.with_metadata("strategy", strategy);
            }
            self.store_memory(request).await;
        }

        Some(analysis.analysis_id)
    }

    /// Request a mode change. Rejected while in minimal mode.
    pub async fn transition_state(
        &self,
        new_state: CognitiveState,
        trigger: &str,
        reason: &str,
        context: Option<Map<String, Value>>,
    ) -> bool {
        if self.is_minimal_mode() {
            warn!(to = %new_state, trigger, "Transition refused in minimal mode");
            self.metrics.record_transition(false);
            return false;
        }

        let committed = self
            .state
            .transition_to(new_state, trigger, reason, 1.0, context.unwrap_or_default())
            .await;
        if !committed {
            self.metrics.record_transition(false);
        }
        committed
    }

    pub async fn update_thought_outcome(
        &self,
        id: Uuid,
        outcome: &str,
        reflection: Option<&str>,
    ) -> bool {
        self.journal
            .update_thought_outcome(id, outcome, reflection)
            .await
    }

    pub async fn search_thoughts(&self, query: ThoughtQuery) -> Vec<ThoughtEntry> {
        self.journal.search_thoughts(query).await
    }

    pub async fn get_current_state(&self) -> CognitiveState {
        self.state.current_state().await
    }

    pub async fn get_state_context(&self) -> Map<String, Value> {
        self.state.state_context().await
    }

    /// Full disaster-recovery snapshot: memory, state record, recent
    /// thoughts and counters.
    pub async fn create_backup(&self) -> bool {
        let mut snapshot = self.memory.build_snapshot().await;
        snapshot.state = serde_json::to_value(self.state.record().await).ok();
        snapshot.recent_thoughts = self
            .journal
            .cached_thoughts(self.config.journal.recent_cache_size)
            .await
            .iter()
            .filter_map(|entry| serde_json::to_value(entry).ok())
            .collect();
        snapshot.metrics = serde_json::json!({
            "thoughts_recorded": self.metrics.thoughts_recorded_total.get(),
            "memories_stored": self.metrics.memories_stored_total.get(),
            "decisions_analyzed": self.metrics.decisions_analyzed_total.get(),
            "state_transitions": self.metrics.state_transitions_total.get(),
            "biases_detected": self.metrics.biases_detected_total.get(),
            "working_memory_items": self.memory.working_len().await,
        });

        match self.storage.store_snapshot(&snapshot).await {
            Ok(()) => {
                info!(snapshot_id = %snapshot.id, "Wrote backup snapshot");
                true
            }
            Err(e) => {
                warn!("Failed to write backup snapshot: {}", e);
                false
            }
        }
    }
}
