pub mod models;
pub mod patterns;
pub mod thought_journal;

pub use models::{
    ConfidenceLevel, DecisionType, EmotionalState, JournalStatistics, NewThought, PatternType,
    ThoughtEntry, ThoughtPattern, ThoughtQuery,
};
pub use thought_journal::ThoughtJournal;
