use crate::error::{CognitiveError, Result};
use crate::memory::MemoryTier;
use crate::state::{StateDefinition, StateTopology};
use crate::storage::file::DEFAULT_COMPACTION_THRESHOLD;
use crate::storage::DEFAULT_MAX_SNAPSHOTS;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Local storage settings (file backend)
    pub storage: StorageConfig,

    /// Memory tiers, decay and consolidation
    pub memory: MemoryConfig,

    /// Thought journal caching and pattern detection
    pub journal: JournalConfig,

    /// Operating-mode topology and recovery
    pub state_machine: StateMachineConfig,

    /// Decision analysis and bias thresholds
    pub metacognition: MetacognitionConfig,

    /// Background worker schedule and shutdown
    pub orchestrator: OrchestratorConfig,

    /// Log output
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory used by the file storage backend
    pub data_dir: PathBuf,

    /// Snapshots kept before the oldest are pruned
    pub max_snapshots: usize,

    /// Log entries per collection before the file backend compacts it
    pub compaction_threshold: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Maximum items held in the working tier (Miller's 7±2)
    pub working_capacity: usize,

    /// TTL for working-tier items in the backing store
    pub working_ttl_seconds: u64,

    /// TTL for short-term items
    pub short_term_ttl_seconds: u64,

    /// Per-hour decay rate for each tier
    pub decay_rates: TierDecayRates,

    /// Strength above which an item is promoted on access
    pub promotion_threshold: f64,

    /// Working/short-term items weaker than this are forgotten
    pub expiry_strength_floor: f64,

    /// Seconds between scheduled consolidation passes; ad-hoc passes are
    /// rate limited to the same interval
    pub consolidation_interval_seconds: u64,

    /// Short-term items copied into each snapshot
    pub snapshot_sample_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierDecayRates {
    pub working: f64,
    pub short_term: f64,
    pub long_term: f64,
    pub episodic: f64,
}

impl TierDecayRates {
    pub fn for_tier(&self, tier: MemoryTier) -> f64 {
        match tier {
            MemoryTier::Working => self.working,
            MemoryTier::ShortTerm => self.short_term,
            MemoryTier::LongTerm => self.long_term,
            MemoryTier::Episodic => self.episodic,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// Entries kept in the in-process recent cache
    pub recent_cache_size: usize,

    /// How many recent entries are compared for related thoughts
    pub related_window: usize,

    /// Shared distinct words needed to link two thoughts
    pub related_min_shared_words: usize,

    /// Maximum related ids stored per thought
    pub max_related: usize,

    /// Cached entries required before pattern detection runs
    pub pattern_min_entries: usize,

    /// Window for the confidence moving average
    pub confidence_window: usize,

    /// Average confidence shift that counts as a trend
    pub confidence_trend_threshold: f64,

    /// Window for decision-type concentration
    pub type_concentration_window: usize,

    /// Share of one decision type that counts as a bias
    pub type_concentration_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateMachineConfig {
    /// State definitions; must cover every state exactly once
    pub states: Vec<StateDefinition>,

    /// Multiple of max_duration after which a restart forces recovery
    pub crash_recovery_multiplier: f64,

    /// Transitions kept in the in-process history
    pub transition_history_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetacognitionConfig {
    /// Analyses kept in the in-process cache
    pub analysis_cache_size: usize,

    /// Analyses required before systematic bias detection runs
    pub min_decisions_for_bias_analysis: usize,

    /// Most recent analyses scanned for systematic biases
    pub bias_window: usize,

    /// Seconds before the same bias type may be recorded again
    pub bias_cooldown_seconds: u64,

    /// Skill samples used for the improvement-rate regression
    pub learning_window: usize,

    /// Empirical detection thresholds
    pub thresholds: BiasThresholds,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BiasThresholds {
    pub overconfidence_confidence: f64,
    pub overconfidence_score: f64,
    pub overconfidence_min_samples: usize,
    pub loss_aversion_minutes: f64,
    pub pattern_seeking_confidence: f64,
    pub pattern_seeking_fundamental: f64,
    pub confirmation_min_bucket: usize,
    pub confirmation_max_diversity: usize,
    pub confirmation_variance: f64,
    pub confirmation_score: f64,
    pub recency_min_decisions: usize,
    pub recency_recent_window: usize,
    pub recency_prior_window: usize,
    pub recency_shift: f64,
    pub overtrading_frequency_per_hour: f64,
    pub overtrading_accuracy: f64,
    pub overtrading_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Run the maintenance worker after startup
    pub enable_background_processing: bool,

    /// Seconds between maintenance ticks
    pub tick_interval_seconds: u64,

    /// Seconds between daily thought archival runs
    pub archival_interval_seconds: u64,

    /// Seconds between bias analysis + performance attribution runs
    pub attribution_interval_seconds: u64,

    /// Window used by the periodic attribution
    pub attribution_period_days: u32,

    /// Bound on waiting for the worker during shutdown
    pub shutdown_timeout_seconds: u64,

    /// |pnl| above which an outcome becomes an episodic memory
    pub episodic_pnl_threshold: f64,

    /// |pnl| above which that memory is stored as HIGH importance
    pub high_importance_pnl_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace) or a full filter directive
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./cognition-data"),
            max_snapshots: DEFAULT_MAX_SNAPSHOTS,
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            working_capacity: 7,
            working_ttl_seconds: 3600,
            short_term_ttl_seconds: 7 * 24 * 3600,
            decay_rates: TierDecayRates::default(),
            promotion_threshold: 3.0,
            expiry_strength_floor: 0.5,
            consolidation_interval_seconds: 3600,
            snapshot_sample_size: 10,
        }
    }
}

impl Default for TierDecayRates {
    fn default() -> Self {
        Self {
            working: 0.1,
            short_term: 0.05,
            long_term: 0.01,
            episodic: 0.005,
        }
    }
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            recent_cache_size: 100,
            related_window: 20,
            related_min_shared_words: 3,
            max_related: 5,
            pattern_min_entries: 10,
            confidence_window: 5,
            confidence_trend_threshold: 0.5,
            type_concentration_window: 20,
            type_concentration_threshold: 0.6,
        }
    }
}

impl Default for StateMachineConfig {
    fn default() -> Self {
        Self {
            states: StateTopology::default_definitions(),
            crash_recovery_multiplier: 2.0,
            transition_history_limit: 50,
        }
    }
}

impl Default for MetacognitionConfig {
    fn default() -> Self {
        Self {
            analysis_cache_size: 200,
            min_decisions_for_bias_analysis: 10,
            bias_window: 50,
            bias_cooldown_seconds: 3600,
            learning_window: 10,
            thresholds: BiasThresholds::default(),
        }
    }
}

impl Default for BiasThresholds {
    fn default() -> Self {
        Self {
            overconfidence_confidence: 0.8,
            overconfidence_score: 0.7,
            overconfidence_min_samples: 3,
            loss_aversion_minutes: 60.0,
            pattern_seeking_confidence: 0.7,
            pattern_seeking_fundamental: 0.4,
            confirmation_min_bucket: 5,
            confirmation_max_diversity: 2,
            confirmation_variance: 0.1,
            confirmation_score: 0.6,
            recency_min_decisions: 15,
            recency_recent_window: 5,
            recency_prior_window: 10,
            recency_shift: 0.6,
            overtrading_frequency_per_hour: 2.0,
            overtrading_accuracy: 0.6,
            overtrading_score: 0.5,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            enable_background_processing: true,
            tick_interval_seconds: 60,
            archival_interval_seconds: 86400,
            attribution_interval_seconds: 7200,
            attribution_period_days: 7,
            shutdown_timeout_seconds: 30,
            episodic_pnl_threshold: 500.0,
            high_importance_pnl_threshold: 1000.0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

fn parse_env<T>(name: &str, target: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Ok(raw) = env::var(name) {
        *target = raw
            .parse()
            .map_err(|e| CognitiveError::Configuration(format!("Invalid {name}: {e}")))?;
    }
    Ok(())
}

impl Config {
    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // Load .env file if present

        let mut config = Config::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load a TOML file; environment variables still override it
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CognitiveError::Configuration(format!("Cannot read {}: {e}", path.display()))
        })?;
        let mut config: Config = toml::from_str(&raw).map_err(|e| {
            CognitiveError::Configuration(format!("Invalid config file {}: {e}", path.display()))
        })?;

        dotenv::dotenv().ok();
        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(dir) = env::var("DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
        parse_env("MAX_SNAPSHOTS", &mut self.storage.max_snapshots)?;

        parse_env("WORKING_MEMORY_CAPACITY", &mut self.memory.working_capacity)?;
        parse_env("WORKING_MEMORY_TTL_SECONDS", &mut self.memory.working_ttl_seconds)?;
        parse_env("SHORT_TERM_TTL_SECONDS", &mut self.memory.short_term_ttl_seconds)?;
        parse_env("PROMOTION_THRESHOLD", &mut self.memory.promotion_threshold)?;

        parse_env(
            "ENABLE_BACKGROUND_PROCESSING",
            &mut self.orchestrator.enable_background_processing,
        )?;
        parse_env("MAINTENANCE_TICK_SECONDS", &mut self.orchestrator.tick_interval_seconds)?;
        parse_env(
            "CONSOLIDATION_INTERVAL_SECONDS",
            &mut self.memory.consolidation_interval_seconds,
        )?;
        parse_env(
            "ARCHIVAL_INTERVAL_SECONDS",
            &mut self.orchestrator.archival_interval_seconds,
        )?;
        parse_env(
            "ATTRIBUTION_INTERVAL_SECONDS",
            &mut self.orchestrator.attribution_interval_seconds,
        )?;
        parse_env(
            "SHUTDOWN_TIMEOUT_SECONDS",
            &mut self.orchestrator.shutdown_timeout_seconds,
        )?;

        if let Ok(level) = env::var("LOG_LEVEL") {
            self.logging.level = level;
        }
        parse_env("LOG_JSON", &mut self.logging.json)?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(CognitiveError::Configuration(msg.to_string()));

        if self.storage.max_snapshots == 0 || self.storage.compaction_threshold == 0 {
            return invalid("Snapshot retention and compaction threshold must be greater than 0");
        }

        if !(5..=9).contains(&self.memory.working_capacity) {
            return invalid("Working memory capacity must be within Miller's 7±2 (5..=9)");
        }

        let rates = &self.memory.decay_rates;
        if [rates.working, rates.short_term, rates.long_term, rates.episodic]
            .iter()
            .any(|r| !r.is_finite() || *r < 0.0)
        {
            return invalid("Decay rates must be finite and non-negative");
        }

        if self.memory.working_ttl_seconds == 0 || self.memory.short_term_ttl_seconds == 0 {
            return invalid("Tier TTLs must be greater than 0");
        }

        if self.memory.expiry_strength_floor >= self.memory.promotion_threshold {
            return invalid("Expiry floor must be below the promotion threshold");
        }

        if self.journal.recent_cache_size < self.journal.related_window
            || self.journal.recent_cache_size < self.journal.type_concentration_window
        {
            return invalid("Journal cache must hold at least the analysis windows");
        }

        if !(0.0..=1.0).contains(&self.journal.type_concentration_threshold) {
            return invalid("Type concentration threshold must be between 0.0 and 1.0");
        }

        if self.state_machine.crash_recovery_multiplier < 1.0 {
            return invalid("Crash recovery multiplier must be at least 1.0");
        }

        StateTopology::from_definitions(self.state_machine.states.clone())?;

        if self.metacognition.bias_window < self.metacognition.min_decisions_for_bias_analysis {
            return invalid("Bias window must cover the minimum decision count");
        }

        if self.metacognition.learning_window < 2 {
            return invalid("Learning window needs at least two samples for a trend");
        }

        let orchestrator = &self.orchestrator;
        if orchestrator.tick_interval_seconds == 0
            || self.memory.consolidation_interval_seconds == 0
            || orchestrator.archival_interval_seconds == 0
            || orchestrator.attribution_interval_seconds == 0
        {
            return invalid("Maintenance intervals must be greater than 0");
        }

        if orchestrator.attribution_period_days == 0 {
            return invalid("Attribution period must be at least one day");
        }

        Ok(())
    }

    /// Render the default configuration as TOML
    pub fn sample_toml() -> Result<String> {
        toml::to_string_pretty(&Config::default())
            .map_err(|e| CognitiveError::Configuration(format!("Cannot render config: {e}")))
    }
}
