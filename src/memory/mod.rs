pub mod consolidation;
pub mod models;
pub mod store;
pub mod strength;

pub use models::{
    ConsolidationReport, ImportanceLevel, MemoryItem, MemoryStatistics, MemoryTier, SearchQuery,
    StoreMemoryRequest,
};
pub use store::MemoryStore;
