use super::maintenance::MaintenanceWorker;
use super::CognitiveOrchestrator;
use crate::error::{CognitiveError, Result};
use crate::journal::{ConfidenceLevel, DecisionType, NewThought};
use crate::monitoring::SystemHealth;
use crate::state::{CognitiveState, StateTopology, StateTransition};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

/// States whose entry is journaled as a metacognitive thought.
const JOURNALED_STATES: [CognitiveState; 4] = [
    CognitiveState::Analyzing,
    CognitiveState::Executing,
    CognitiveState::Reflecting,
    CognitiveState::Emergency,
];

fn transition_thought(transition: &StateTransition) -> NewThought {
    let reasoning = if transition.reason.is_empty() {
        format!("Triggered by {}", transition.trigger)
    } else {
        format!("Triggered by {}: {}", transition.trigger, transition.reason)
    };
    NewThought::new(
        format!(
            "Moved from {} to {}",
            transition.from_state, transition.to_state
        ),
        reasoning,
        ConfidenceLevel::from_probability(transition.confidence),
        DecisionType::Metacognitive,
    )
    .with_tags(["state_transition", transition.to_state.as_str()])
    .with_context("transition_id", transition.id.to_string())
    .with_context("forced", transition.forced)
}

fn context(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

impl CognitiveOrchestrator {
    /// Bring the runtime up: restore state, check health, recover or fall
    /// back to minimal mode, then start observing.
    pub async fn start(&self) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(CognitiveError::InvalidRequest {
                message: "orchestrator has been shut down".to_string(),
            });
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(CognitiveError::InvalidRequest {
                message: "orchestrator already started".to_string(),
            });
        }
        info!("Starting cognitive orchestrator");

        self.register_callbacks().await;

        let restored = self.state.load_persisted_state().await;
        if restored != CognitiveState::Initializing {
            let ctx = context(&[("restored_state", Value::from(restored.as_str()))]);
            self.enter(
                CognitiveState::Initializing,
                "startup",
                "orchestrator starting",
                ctx,
            )
            .await;
        }

        self.memory.warm_working_cache().await;

        let mut health = self.health_check().await;
        if !health.is_healthy() {
            warn!(
                failing = ?health.failing_components(),
                "Startup health check failed, attempting recovery"
            );
            health = self.recover().await;
        }

        if !health.is_healthy() {
            error!(
                failing = ?health.failing_components(),
                "Recovery failed, entering minimal mode"
            );
            self.minimal_mode.store(true, Ordering::SeqCst);
            self.state
                .force_transition(
                    CognitiveState::Emergency,
                    "startup_failure",
                    "health checks failed after recovery",
                    context(&[(
                        "failing_components",
                        Value::from(health.failing_components()),
                    )]),
                )
                .await;
            return Ok(());
        }

        self.enter(
            CognitiveState::Observing,
            "startup_complete",
            "all systems healthy",
            Map::new(),
        )
        .await;

        if self.config.orchestrator.enable_background_processing {
            let worker = MaintenanceWorker {
                memory: self.memory.clone(),
                journal: self.journal.clone(),
                state: self.state.clone(),
                metacognition: self.metacognition.clone(),
                metrics: self.metrics.clone(),
                config: self.config.orchestrator.clone(),
            };
            *self.worker.lock().await = Some(worker.spawn());
        } else {
            info!("Background processing disabled");
        }

        info!("Cognitive orchestrator started");
        Ok(())
    }

    /// Transition normally, forcing the move when the topology refuses it.
    async fn enter(
        &self,
        state: CognitiveState,
        trigger: &str,
        reason: &str,
        context: Map<String, Value>,
    ) {
        if !self
            .state
            .transition_to(state, trigger, reason, 1.0, context.clone())
            .await
        {
            self.state
                .force_transition(state, trigger, reason, context)
                .await;
        }
    }

    async fn register_callbacks(&self) {
        let metrics = self.metrics.clone();
        self.state
            .register_transition_callback(None, None, move |_transition| {
                let metrics = metrics.clone();
                async move { metrics.record_transition(true) }
            })
            .await;

        for state in JOURNALED_STATES {
            let journal = self.journal.clone();
            let metrics = self.metrics.clone();
            self.state
                .register_transition_callback(None, Some(state), move |transition| {
                    let journal = journal.clone();
                    let metrics = metrics.clone();
                    async move {
                        if journal
                            .record_thought(transition_thought(&transition))
                            .await
                            .is_some()
                        {
                            metrics.thoughts_recorded_total.inc();
                        }
                    }
                })
                .await;
        }
    }

    /// Reset state, rebuild memory from the latest snapshot, write a fresh
    /// backup and check again.
    async fn recover(&self) -> SystemHealth {
        self.state
            .emergency_reset("startup health check failed")
            .await;

        self.memory.clear_caches().await;
        self.journal.clear_cache().await;
        self.metacognition.clear_cache().await;

        match self.storage.load_latest_snapshot().await {
            Ok(Some(snapshot)) => {
                self.memory.restore_from_snapshot(&snapshot).await;
            }
            Ok(None) => info!("No snapshot available for recovery"),
            Err(e) => warn!("Could not load snapshot during recovery: {}", e),
        }

        if !self.create_backup().await {
            warn!("Recovery backup could not be written");
        }

        self.health_check().await
    }

    /// Probe storage, every subsystem and the configured state topology.
    pub async fn health_check(&self) -> SystemHealth {
        let mut components = BTreeMap::new();

        let storage = self
            .health
            .check_component("storage", async {
                match self.storage.health_check().await {
                    Ok(checks) => checks.values().all(|ok| *ok),
                    Err(e) => {
                        warn!("Storage health check failed: {}", e);
                        false
                    }
                }
            })
            .await;
        components.insert("storage".to_string(), storage);

        let memory = self
            .health
            .check_component("memory", self.memory.health_check())
            .await;
        components.insert("memory".to_string(), memory);

        let state = self
            .health
            .check_component("state_machine", self.state.health_check())
            .await;
        components.insert("state_machine".to_string(), state);

        let journal = self
            .health
            .check_component("journal", self.journal.health_check())
            .await;
        components.insert("journal".to_string(), journal);

        let metacognition = self
            .health
            .check_component("metacognition", self.metacognition.health_check())
            .await;
        components.insert("metacognition".to_string(), metacognition);

        let topology = self
            .health
            .check_component("configuration", async {
                StateTopology::from_definitions(self.config.state_machine.states.clone()).is_ok()
            })
            .await;
        components.insert("configuration".to_string(), topology);

        self.health.aggregate(components)
    }

    /// Stop the worker, consolidate, back up and park in MAINTENANCE.
    /// Later calls do nothing.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            info!("Shutdown already performed");
            return;
        }
        info!("Shutting down cognitive orchestrator");

        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            worker
                .stop(Duration::from_secs(self.config.orchestrator.shutdown_timeout_seconds))
                .await;
        }

        let report = self.memory.force_consolidate().await;
        self.metrics.consolidations_total.inc();
        info!(
            promoted = report.promoted,
            expired = report.expired,
            "Final consolidation complete"
        );

        if !self.create_backup().await {
            warn!("Final backup could not be written");
        }

        self.enter(
            CognitiveState::Maintenance,
            "shutdown",
            "orchestrator shutting down",
            Map::new(),
        )
        .await;

        info!("Cognitive orchestrator shut down");
    }
}

/// Wait for Ctrl+C or SIGTERM.
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install terminate signal handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn test_transition_thought_is_metacognitive() {
        let transition = StateTransition {
            id: Uuid::new_v4(),
            from_state: CognitiveState::Observing,
            to_state: CognitiveState::Analyzing,
            trigger: "signal".to_string(),
            timestamp: Utc::now(),
            duration_seconds: 12.0,
            context: Map::new(),
            reason: "breakout on BTC".to_string(),
            confidence: 0.8,
            success: true,
            forced: false,
        };

        let thought = transition_thought(&transition);
        assert_eq!(thought.decision_type, DecisionType::Metacognitive);
        assert_eq!(thought.confidence, ConfidenceLevel::High);
        assert!(thought.decision.contains("analyzing"));
        assert!(thought.reasoning.contains("breakout"));
        assert!(thought.tags.contains(&"state_transition".to_string()));
    }
}
