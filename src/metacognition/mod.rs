//! Post-hoc review of decisions: accuracy, cognitive biases, learning
//! progress and P&L attribution.

pub mod attribution;
pub mod biases;
pub mod engine;
pub mod learning;
pub mod models;

pub use engine::MetacognitionEngine;
pub use models::{
    AnalysisOutcome, AttributionReport, BiasDetection, BiasType, DecisionAnalysis,
    DecisionOutcome, DecisionReport, LearningMetric, LearningType, PerformanceAttribution,
};
