pub mod machine;
pub mod models;
pub mod topology;

pub use machine::{StateMachine, TransitionCallback};
pub use models::{
    CognitiveState, IntegrityReport, StateDefinition, StateRecord, StateStatistics,
    StateTransition,
};
pub use topology::StateTopology;
