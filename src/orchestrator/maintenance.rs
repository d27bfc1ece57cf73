//! Background maintenance: one tokio task ticking on a fixed interval.
//!
//! Every tick validates state integrity. Consolidation, archival of the
//! previous day's thoughts, and bias analysis with attribution run when
//! their own intervals have elapsed. The shutdown channel is checked while
//! waiting and again before each action.

use crate::config::OrchestratorConfig;
use crate::journal::ThoughtJournal;
use crate::memory::MemoryStore;
use crate::metacognition::{AttributionReport, MetacognitionEngine};
use crate::monitoring::CognitiveMetrics;
use crate::state::StateMachine;
use chrono::Utc;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub(crate) struct MaintenanceWorker {
    pub memory: Arc<MemoryStore>,
    pub journal: Arc<ThoughtJournal>,
    pub state: Arc<StateMachine>,
    pub metacognition: Arc<MetacognitionEngine>,
    pub metrics: CognitiveMetrics,
    pub config: OrchestratorConfig,
}

/// Handle kept by the orchestrator to stop the worker.
#[derive(Debug)]
pub(crate) struct WorkerHandle {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal the worker and wait up to `timeout`, aborting it afterwards.
    pub async fn stop(self, timeout: Duration) {
        if self.shutdown_tx.send(()).is_err() {
            debug!("Maintenance worker already gone");
        }

        let mut handle = self.handle;
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => info!("Maintenance worker stopped"),
            Ok(Err(e)) => error!("Maintenance worker ended abnormally: {}", e),
            Err(_) => {
                warn!(
                    timeout_seconds = timeout.as_secs(),
                    "Maintenance worker did not stop in time, aborting"
                );
                handle.abort();
            }
        }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

struct Schedule {
    every: Duration,
    last: Instant,
}

impl Schedule {
    fn new(every_seconds: u64, now: Instant) -> Self {
        Self {
            every: Duration::from_secs(every_seconds),
            last: now,
        }
    }

    fn due(&mut self, now: Instant) -> bool {
        if now.duration_since(self.last) >= self.every {
            self.last = now;
            true
        } else {
            false
        }
    }
}

fn shutdown_requested(shutdown: &mut broadcast::Receiver<()>) -> bool {
    !matches!(shutdown.try_recv(), Err(TryRecvError::Empty))
}

impl MaintenanceWorker {
    pub fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(self.run(shutdown_rx));
        info!("Maintenance worker started");
        WorkerHandle {
            shutdown_tx,
            handle,
        }
    }

    async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let period = Duration::from_secs(self.config.tick_interval_seconds);
        let start = Instant::now();
        let mut ticker = interval_at(start + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut consolidation =
            Schedule::new(self.memory.config().consolidation_interval_seconds, start);
        let mut archival = Schedule::new(self.config.archival_interval_seconds, start);
        let mut attribution = Schedule::new(self.config.attribution_interval_seconds, start);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("Maintenance worker received shutdown");
                    break;
                }
                _ = ticker.tick() => {
                    let tick_started = std::time::Instant::now();
                    let flow = self
                        .tick(&mut shutdown, &mut consolidation, &mut archival, &mut attribution)
                        .await;
                    self.metrics.record_tick(tick_started);
                    if flow.is_break() {
                        break;
                    }
                }
            }
        }
    }

    async fn tick(
        &self,
        shutdown: &mut broadcast::Receiver<()>,
        consolidation: &mut Schedule,
        archival: &mut Schedule,
        attribution: &mut Schedule,
    ) -> ControlFlow<()> {
        let report = self.state.validate_state_integrity().await;
        if let Some(state) = report.corrected_to {
            info!(corrected_to = %state, "Integrity check corrected state");
        }

        if shutdown_requested(shutdown) {
            return ControlFlow::Break(());
        }
        let now = Instant::now();
        if consolidation.due(now) {
            // The schedule already spaces passes out
            self.memory.force_consolidate().await;
            self.metrics.consolidations_total.inc();
        }

        if shutdown_requested(shutdown) {
            return ControlFlow::Break(());
        }
        if archival.due(now) {
            let yesterday = Utc::now().date_naive() - chrono::Duration::days(1);
            if !self.journal.archive_daily_thoughts(yesterday).await {
                warn!(date = %yesterday, "Daily thought archival failed");
            }
        }

        if shutdown_requested(shutdown) {
            return ControlFlow::Break(());
        }
        if attribution.due(now) {
            let biases = self.metacognition.analyze_systematic_biases().await;
            self.metrics.biases_detected_total.inc_by(biases.len() as u64);

            let period = i64::from(self.config.attribution_period_days);
            if let AttributionReport::InsufficientData { .. } = self
                .metacognition
                .generate_performance_attribution(period)
                .await
            {
                debug!(period_days = period, "Not enough outcomes for attribution");
            }
        }

        self.metrics
            .set_working_memory_items(self.memory.working_len().await);
        ControlFlow::Continue(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_due_after_interval() {
        let start = Instant::now();
        let mut schedule = Schedule::new(10, start);
        assert!(!schedule.due(start + Duration::from_secs(5)));
        assert!(schedule.due(start + Duration::from_secs(10)));
        // Resets from the moment it fired
        assert!(!schedule.due(start + Duration::from_secs(15)));
        assert!(schedule.due(start + Duration::from_secs(20)));
    }

    #[tokio::test]
    async fn test_shutdown_requested_on_signal_or_drop() {
        let (tx, mut rx) = broadcast::channel(1);
        assert!(!shutdown_requested(&mut rx));
        tx.send(()).unwrap();
        assert!(shutdown_requested(&mut rx));

        let (tx, mut rx) = broadcast::channel::<()>(1);
        drop(tx);
        assert!(shutdown_requested(&mut rx));
    }
}
