//! Cognitive runtime for autonomous trading agents: tiered decaying memory,
//! a decision journal, a crash-recoverable mode state machine and
//! metacognitive review of outcomes, all behind one orchestrator.

pub mod config;
pub mod error;
pub mod journal;
pub mod memory;
pub mod metacognition;
pub mod monitoring;
pub mod orchestrator;
pub mod state;
pub mod storage;

pub use config::Config;
pub use error::{CognitiveError, Result};

pub use journal::{
    ConfidenceLevel, DecisionType, EmotionalState, NewThought, ThoughtEntry, ThoughtJournal,
    ThoughtQuery,
};
pub use memory::{
    ImportanceLevel, MemoryItem, MemoryStore, MemoryTier, SearchQuery, StoreMemoryRequest,
};
pub use metacognition::{
    AttributionReport, BiasDetection, BiasType, DecisionOutcome, DecisionReport,
    MetacognitionEngine,
};
pub use monitoring::{CognitiveMetrics, HealthStatus, SystemHealth};
pub use orchestrator::{CognitiveOrchestrator, CognitiveSummary};
pub use state::{CognitiveState, StateMachine};
pub use storage::{FileStorage, InMemoryStorage, StorageBackend, StorageError};
