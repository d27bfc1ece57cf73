use super::models::{
    CognitiveState, IntegrityReport, StateRecord, StateStatistics, StateTransition,
};
use super::topology::StateTopology;
use crate::config::StateMachineConfig;
use crate::error::Result;
use crate::storage::{collections, Query, SortDirection, StorageBackend};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub type TransitionCallback = Arc<dyn Fn(StateTransition) -> BoxFuture<'static, ()> + Send + Sync>;

struct RegisteredCallback {
    from: Option<CognitiveState>,
    to: Option<CognitiveState>,
    callback: TransitionCallback,
}

impl RegisteredCallback {
    fn matches(&self, transition: &StateTransition) -> bool {
        self.from.map_or(true, |s| s == transition.from_state)
            && self.to.map_or(true, |s| s == transition.to_state)
    }
}

/// Single-instance operating-mode machine.
///
/// The in-process record is authoritative; every change is written to
/// storage before any hook runs. A failed write is logged and the machine
/// keeps operating so it can still reach EMERGENCY with storage down.
pub struct StateMachine {
    storage: Arc<dyn StorageBackend>,
    config: StateMachineConfig,
    topology: StateTopology,
    record: RwLock<StateRecord>,
    history: RwLock<VecDeque<StateTransition>>,
    callbacks: RwLock<Vec<RegisteredCallback>>,
    rejected: AtomicU64,
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("storage", &self.storage)
            .field("topology", &self.topology)
            .field("rejected", &self.rejected.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl StateMachine {
    pub fn new(config: StateMachineConfig, storage: Arc<dyn StorageBackend>) -> Result<Self> {
        let topology = StateTopology::from_definitions(config.states.clone())?;
        Ok(Self {
            storage,
            config,
            topology,
            record: RwLock::new(StateRecord::initial()),
            history: RwLock::new(VecDeque::new()),
            callbacks: RwLock::new(Vec::new()),
            rejected: AtomicU64::new(0),
        })
    }

    pub fn topology(&self) -> &StateTopology {
        &self.topology
    }

    pub async fn current_state(&self) -> CognitiveState {
        self.record.read().await.current_state
    }

    pub async fn record(&self) -> StateRecord {
        self.record.read().await.clone()
    }

    pub async fn state_context(&self) -> Map<String, Value> {
        self.record.read().await.state_context.clone()
    }

    pub async fn time_in_state(&self) -> chrono::Duration {
        Utc::now() - self.record.read().await.state_entry_time
    }

    pub fn rejected_transitions(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Run `callback` after every transition matching `from`/`to`; `None`
    /// matches any state.
    pub async fn register_transition_callback<F, Fut>(
        &self,
        from: Option<CognitiveState>,
        to: Option<CognitiveState>,
        callback: F,
    ) where
        F: Fn(StateTransition) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: TransitionCallback = Arc::new(move |transition| callback(transition).boxed());
        self.callbacks.write().await.push(RegisteredCallback {
            from,
            to,
            callback: handler,
        });
    }

    async fn persist_record(&self, record: &StateRecord) -> bool {
        let value = match serde_json::to_value(record) {
            Ok(value) => value,
            Err(e) => {
                error!("Failed to serialize state record: {}", e);
                return false;
            }
        };
        match self
            .storage
            .store_item(collections::COGNITIVE_STATE, collections::CURRENT_STATE_ID, value, None)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(state = %record.current_state, "Failed to persist state record: {}", e);
                false
            }
        }
    }

    pub async fn transition_to(
        &self,
        new_state: CognitiveState,
        trigger: &str,
        reason: &str,
        confidence: f64,
        context: Map<String, Value>,
    ) -> bool {
        let transition = {
            let mut record = self.record.write().await;
            let from = record.current_state;
            if !self.topology.is_allowed(from, new_state) {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(from = %from, to = %new_state, trigger, "Rejected state transition");
                return false;
            }
            self.commit(&mut record, new_state, trigger, reason, confidence, context, false)
                .await
        };

        info!(
            from = %transition.from_state,
            to = %new_state,
            trigger,
            duration_seconds = transition.duration_seconds,
            "State transition"
        );
        self.finish(&transition).await;
        true
    }

    /// Transition without checking the topology. Audited with `forced = true`.
    pub async fn force_transition(
        &self,
        new_state: CognitiveState,
        trigger: &str,
        reason: &str,
        context: Map<String, Value>,
    ) -> StateTransition {
        let transition = {
            let mut record = self.record.write().await;
            self.commit(&mut record, new_state, trigger, reason, 1.0, context, true)
                .await
        };

        warn!(
            from = %transition.from_state,
            to = %new_state,
            trigger,
            reason,
            "Forced state transition"
        );
        self.finish(&transition).await;
        transition
    }

    /// Replace the record under the caller's write lock, persisting it first.
    #[allow(clippy::too_many_arguments)]
    async fn commit(
        &self,
        record: &mut StateRecord,
        new_state: CognitiveState,
        trigger: &str,
        reason: &str,
        confidence: f64,
        context: Map<String, Value>,
        forced: bool,
    ) -> StateTransition {
        let from = record.current_state;
        let now = Utc::now();
        let duration_seconds = seconds_between(record.state_entry_time, now);
        let next = StateRecord {
            current_state: new_state,
            state_entry_time: now,
            previous_state: Some(from),
            state_context: context.clone(),
        };

        self.persist_record(&next).await;
        *record = next;

        StateTransition {
            id: Uuid::new_v4(),
            from_state: from,
            to_state: new_state,
            trigger: trigger.to_string(),
            timestamp: now,
            duration_seconds,
            context,
            reason: reason.to_string(),
            confidence,
            success: true,
            forced,
        }
    }

    /// Audit, actions and callbacks, run after the record lock is released.
    async fn finish(&self, transition: &StateTransition) {
        self.record_transition(transition).await;
        self.run_actions(transition);
        self.fire_callbacks(transition).await;
    }

    async fn record_transition(&self, transition: &StateTransition) {
        match serde_json::to_value(transition) {
            Ok(value) => {
                if let Err(e) = self
                    .storage
                    .store_item(
                        collections::STATE_TRANSITIONS,
                        &transition.id.to_string(),
                        value,
                        None,
                    )
                    .await
                {
                    warn!("Failed to persist state transition: {}", e);
                }
            }
            Err(e) => error!("Failed to serialize state transition: {}", e),
        }

        let mut history = self.history.write().await;
        history.push_back(transition.clone());
        while history.len() > self.config.transition_history_limit {
            history.pop_front();
        }
    }

    fn run_actions(&self, transition: &StateTransition) {
        if let Some(definition) = self.topology.definition(transition.from_state) {
            for action in &definition.exit_actions {
                debug!(state = %transition.from_state, action = %action, "Exit action");
            }
        }
        if let Some(definition) = self.topology.definition(transition.to_state) {
            for action in &definition.entry_actions {
                debug!(state = %transition.to_state, action = %action, "Entry action");
            }
        }
    }

    async fn fire_callbacks(&self, transition: &StateTransition) {
        let matching: Vec<TransitionCallback> = self
            .callbacks
            .read()
            .await
            .iter()
            .filter(|registered| registered.matches(transition))
            .map(|registered| registered.callback.clone())
            .collect();

        for callback in matching {
            callback(transition.clone()).await;
        }
    }

    /// Restore the persisted record after a restart, recovering from an
    /// unknown state name or a state held far beyond its maximum duration.
    pub async fn load_persisted_state(&self) -> CognitiveState {
        let document = match self
            .storage
            .get_item(collections::COGNITIVE_STATE, collections::CURRENT_STATE_ID)
            .await
        {
            Ok(Some(document)) => document,
            Ok(None) => {
                info!("No persisted cognitive state, starting fresh");
                let record = self.record().await;
                self.persist_record(&record).await;
                return record.current_state;
            }
            Err(e) => {
                warn!("Failed to load persisted cognitive state: {}", e);
                return self.current_state().await;
            }
        };

        let raw_state = document
            .get("current_state")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let Ok(state) = raw_state.parse::<CognitiveState>() else {
            warn!(persisted = %raw_state, "Persisted state is unknown, reinitializing");
            self.force_transition(
                CognitiveState::Initializing,
                "invalid_persisted_state",
                &format!("unknown persisted state '{raw_state}'"),
                Map::new(),
            )
            .await;
            return CognitiveState::Initializing;
        };

        let entry_time = document
            .get("state_entry_time")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let previous_state = document
            .get("previous_state")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok());
        let state_context = document
            .get("state_context")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        {
            let mut record = self.record.write().await;
            *record = StateRecord {
                current_state: state,
                state_entry_time: entry_time,
                previous_state,
                state_context,
            };
        }

        let elapsed = seconds_between(entry_time, Utc::now());
        if let Some(max) = self.topology.max_duration(state) {
            let limit = max.as_secs_f64() * self.config.crash_recovery_multiplier;
            if elapsed > limit {
                warn!(
                    state = %state,
                    elapsed_seconds = elapsed,
                    limit_seconds = limit,
                    "Persisted state is stale, recovering to observing"
                );
                let mut context = Map::new();
                context.insert("recovered_from".to_string(), Value::from(state.as_str()));
                context.insert("elapsed_seconds".to_string(), Value::from(elapsed));
                self.force_transition(
                    CognitiveState::Observing,
                    "crash_recovery",
                    "state held beyond its maximum duration across a restart",
                    context,
                )
                .await;
                return CognitiveState::Observing;
            }
        }

        info!(state = %state, elapsed_seconds = elapsed, "Restored persisted cognitive state");
        state
    }

    /// Check the persisted record and the time spent in the current state,
    /// correcting problems with timeout or forced transitions.
    pub async fn validate_state_integrity(&self) -> IntegrityReport {
        let mut issues = Vec::new();
        let mut corrected_to = None;
        let current = self.current_state().await;

        match self
            .storage
            .get_item(collections::COGNITIVE_STATE, collections::CURRENT_STATE_ID)
            .await
        {
            Ok(Some(document)) => {
                let persisted = document.get("current_state").and_then(Value::as_str);
                match persisted.map(str::parse::<CognitiveState>) {
                    Some(Ok(state)) if state == current => {}
                    Some(Ok(state)) => {
                        issues.push(format!("persisted state {state} out of sync"));
                        let record = self.record().await;
                        self.persist_record(&record).await;
                    }
                    _ => {
                        issues.push(format!(
                            "persisted state {:?} is unknown",
                            persisted.unwrap_or_default()
                        ));
                        self.force_transition(
                            CognitiveState::Initializing,
                            "integrity_check",
                            "unknown persisted state",
                            Map::new(),
                        )
                        .await;
                        corrected_to = Some(CognitiveState::Initializing);
                    }
                }
            }
            Ok(None) => {
                issues.push("no persisted state record".to_string());
                let record = self.record().await;
                self.persist_record(&record).await;
            }
            Err(e) => debug!("Skipping persisted state check: {}", e),
        }

        let state = self.current_state().await;
        let time_in_state = seconds_between(self.record.read().await.state_entry_time, Utc::now());

        if corrected_to.is_none() {
            if let Some(max) = self.topology.max_duration(state) {
                if time_in_state > max.as_secs_f64() {
                    issues.push(format!(
                        "{state} exceeded its maximum duration ({:.0}s > {}s)",
                        time_in_state,
                        max.as_secs()
                    ));
                    corrected_to = Some(self.handle_timeout(state).await);
                }
            }
        }

        if !issues.is_empty() {
            warn!(state = %state, issues = ?issues, "State integrity issues found");
        }

        IntegrityReport {
            checked_at: Utc::now(),
            state,
            time_in_state_seconds: time_in_state,
            issues,
            corrected_to,
        }
    }

    async fn handle_timeout(&self, state: CognitiveState) -> CognitiveState {
        if let Some(target) = self.topology.timeout_transition(state) {
            let reason = format!("{state} timed out");
            if self.transition_to(target, "timeout", &reason, 1.0, Map::new()).await {
                return target;
            }
        }
        self.force_transition(
            CognitiveState::Observing,
            "timeout",
            &format!("{state} timed out without a valid timeout transition"),
            Map::new(),
        )
        .await;
        CognitiveState::Observing
    }

    /// Unconditionally return to INITIALIZING.
    pub async fn emergency_reset(&self, reason: &str) -> StateTransition {
        error!(reason, "Emergency reset of cognitive state");
        self.force_transition(CognitiveState::Initializing, "emergency_reset", reason, Map::new())
            .await
    }

    /// Most recent transitions, newest first.
    pub async fn get_state_history(&self, limit: usize) -> Vec<StateTransition> {
        let query = Query::new()
            .order_by("timestamp", SortDirection::Descending)
            .limit(limit);

        match self
            .storage
            .query_collection(collections::STATE_TRANSITIONS, &query)
            .await
        {
            Ok(documents) => documents
                .into_iter()
                .filter_map(|doc| serde_json::from_value(doc).ok())
                .collect(),
            Err(e) => {
                warn!("Falling back to cached state history: {}", e);
                self.history
                    .read()
                    .await
                    .iter()
                    .rev()
                    .take(limit)
                    .cloned()
                    .collect()
            }
        }
    }

    pub async fn state_statistics(&self) -> StateStatistics {
        let history = self.history.read().await;
        let mut visits: BTreeMap<CognitiveState, usize> = BTreeMap::new();
        let mut durations: BTreeMap<CognitiveState, (f64, usize)> = BTreeMap::new();

        for transition in history.iter() {
            *visits.entry(transition.to_state).or_default() += 1;
            let entry = durations.entry(transition.from_state).or_default();
            entry.0 += transition.duration_seconds;
            entry.1 += 1;
        }

        StateStatistics {
            current_state: self.current_state().await,
            time_in_state_seconds: self.time_in_state().await.num_milliseconds() as f64 / 1000.0,
            visits,
            mean_duration_seconds: durations
                .into_iter()
                .map(|(state, (total, count))| (state, total / count as f64))
                .collect(),
            transitions_considered: history.len(),
            forced_transitions: history.iter().filter(|t| t.forced).count(),
            rejected_transitions: self.rejected_transitions(),
        }
    }

    /// Healthy when the persisted record agrees with the in-memory one. A
    /// machine that has not left its initial state may have no record yet.
    /// Read-only: [`Self::validate_state_integrity`] does the repairs.
    pub async fn health_check(&self) -> bool {
        let current = self.current_state().await;
        match self
            .storage
            .get_item(collections::COGNITIVE_STATE, collections::CURRENT_STATE_ID)
            .await
        {
            Ok(Some(document)) => {
                let persisted = document
                    .get("current_state")
                    .and_then(Value::as_str)
                    .map(str::parse::<CognitiveState>);
                match persisted {
                    Some(Ok(state)) if state == current => true,
                    _ => {
                        warn!(current = %current, "Persisted state record out of sync");
                        false
                    }
                }
            }
            Ok(None) => current == CognitiveState::Initializing,
            Err(e) => {
                warn!("State record unreadable: {}", e);
                false
            }
        }
    }
}

fn seconds_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_milliseconds().max(0) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn machine(storage: Arc<InMemoryStorage>) -> StateMachine {
        StateMachine::new(StateMachineConfig::default(), storage).unwrap()
    }

    async fn go(machine: &StateMachine, state: CognitiveState) -> bool {
        machine.transition_to(state, "test", "", 1.0, Map::new()).await
    }

    #[tokio::test]
    async fn test_allowed_and_rejected_transitions() {
        let machine = machine(Arc::new(InMemoryStorage::new()));
        assert!(go(&machine, CognitiveState::Observing).await);

        assert!(!go(&machine, CognitiveState::Executing).await);
        assert_eq!(machine.current_state().await, CognitiveState::Observing);
        assert_eq!(machine.rejected_transitions(), 1);

        assert!(go(&machine, CognitiveState::Analyzing).await);
        assert_eq!(machine.current_state().await, CognitiveState::Analyzing);
    }

    #[tokio::test]
    async fn test_record_persisted_and_audited() {
        let storage = Arc::new(InMemoryStorage::new());
        let machine = machine(storage.clone());
        go(&machine, CognitiveState::Observing).await;

        let record = storage
            .get_item(collections::COGNITIVE_STATE, collections::CURRENT_STATE_ID)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record["current_state"], "observing");
        assert_eq!(record["previous_state"], "initializing");

        let history = machine.get_state_history(10).await;
        assert_eq!(history.len(), 1);
        assert!(!history[0].forced);
    }

    #[tokio::test]
    async fn test_unknown_persisted_state_reinitializes() {
        let storage = Arc::new(InMemoryStorage::new());
        storage
            .store_item(
                collections::COGNITIVE_STATE,
                collections::CURRENT_STATE_ID,
                json!({"current_state": "dreaming", "state_entry_time": Utc::now()}),
                None,
            )
            .await
            .unwrap();

        let machine = machine(storage);
        assert_eq!(machine.load_persisted_state().await, CognitiveState::Initializing);
    }

    #[tokio::test]
    async fn test_stale_persisted_state_recovers_to_observing() {
        let storage = Arc::new(InMemoryStorage::new());
        let entered = Utc::now() - chrono::Duration::minutes(30);
        storage
            .store_item(
                collections::COGNITIVE_STATE,
                collections::CURRENT_STATE_ID,
                json!({"current_state": "analyzing", "state_entry_time": entered}),
                None,
            )
            .await
            .unwrap();

        let machine = machine(storage);
        assert_eq!(machine.load_persisted_state().await, CognitiveState::Observing);
        let history = machine.get_state_history(1).await;
        assert_eq!(history[0].trigger, "crash_recovery");
        assert!(history[0].forced);
    }

    #[tokio::test]
    async fn test_integrity_check_applies_timeout_transition() {
        let storage = Arc::new(InMemoryStorage::new());
        let entered = Utc::now() - chrono::Duration::seconds(700);
        storage
            .store_item(
                collections::COGNITIVE_STATE,
                collections::CURRENT_STATE_ID,
                json!({"current_state": "analyzing", "state_entry_time": entered}),
                None,
            )
            .await
            .unwrap();

        let machine = machine(storage);
        assert_eq!(machine.load_persisted_state().await, CognitiveState::Analyzing);

        let report = machine.validate_state_integrity().await;
        assert_eq!(report.corrected_to, Some(CognitiveState::Observing));
        assert_eq!(machine.current_state().await, CognitiveState::Observing);
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn test_callbacks_fire_for_matching_transitions() {
        let machine = machine(Arc::new(InMemoryStorage::new()));
        let analyzing = Arc::new(AtomicUsize::new(0));
        let any = Arc::new(AtomicUsize::new(0));

        let counter = analyzing.clone();
        machine
            .register_transition_callback(None, Some(CognitiveState::Analyzing), move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;
        let counter = any.clone();
        machine
            .register_transition_callback(None, None, move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        go(&machine, CognitiveState::Observing).await;
        go(&machine, CognitiveState::Analyzing).await;
        go(&machine, CognitiveState::Executing).await;

        assert_eq!(analyzing.load(Ordering::SeqCst), 1);
        assert_eq!(any.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_transitions_continue_without_storage() {
        let storage = Arc::new(InMemoryStorage::new());
        let machine = machine(storage.clone());
        storage.set_unavailable(true);

        machine
            .force_transition(CognitiveState::Emergency, "test", "storage down", Map::new())
            .await;
        assert_eq!(machine.current_state().await, CognitiveState::Emergency);
        assert_eq!(machine.get_state_history(5).await.len(), 1);

        let stats = machine.state_statistics().await;
        assert_eq!(stats.forced_transitions, 1);
        assert_eq!(stats.visits.get(&CognitiveState::Emergency), Some(&1));
    }
}
