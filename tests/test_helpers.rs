//! Shared test infrastructure: an isolated in-memory environment and
//! builders for thoughts and decision reports.

#![allow(dead_code)]

use anyhow::Result;
use std::sync::Arc;
use trading_cognition::config::Config;
use trading_cognition::journal::{ConfidenceLevel, DecisionType, NewThought};
use trading_cognition::metacognition::{DecisionOutcome, DecisionReport};
use trading_cognition::{
    CognitiveOrchestrator, InMemoryStorage, MemoryStore, MetacognitionEngine, StateMachine,
    ThoughtJournal,
};
use uuid::Uuid;

/// Isolated environment backed by a fresh in-memory store
pub struct TestEnvironment {
    pub storage: Arc<InMemoryStorage>,
    pub config: Config,
    pub test_id: String,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let test_id = Uuid::new_v4().to_string()[..8].to_string();
        tracing::info!("Created test environment {}", test_id);
        Self {
            storage: Arc::new(InMemoryStorage::new()),
            config,
            test_id,
        }
    }

    pub fn orchestrator(&self) -> Result<CognitiveOrchestrator> {
        Ok(CognitiveOrchestrator::new(
            self.config.clone(),
            self.storage.clone(),
        )?)
    }

    pub fn memory_store(&self) -> MemoryStore {
        MemoryStore::new(self.config.memory.clone(), self.storage.clone())
    }

    pub fn journal(&self) -> ThoughtJournal {
        ThoughtJournal::new(self.config.journal.clone(), self.storage.clone())
    }

    pub fn state_machine(&self) -> Result<StateMachine> {
        Ok(StateMachine::new(
            self.config.state_machine.clone(),
            self.storage.clone(),
        )?)
    }

    pub fn metacognition(&self) -> MetacognitionEngine {
        MetacognitionEngine::new(self.config.metacognition.clone(), self.storage.clone())
    }
}

/// Defaults with the maintenance worker switched off.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.orchestrator.enable_background_processing = false;
    config
}

pub fn market_thought(decision: &str, confidence: ConfidenceLevel) -> NewThought {
    NewThought::new(
        decision,
        "Momentum and volume both confirm the move",
        confidence,
        DecisionType::MarketAnalysis,
    )
    .with_context("symbol", "BTC-USD")
}

pub fn trade_entry(decision: &str, trade_id: &str) -> NewThought {
    NewThought::new(
        decision,
        "Breakout above resistance with rising volume",
        ConfidenceLevel::Medium,
        DecisionType::TradeEntry,
    )
    .with_strategy("momentum")
    .with_trade(trade_id)
}

pub fn decision(confidence: f64, outcome: DecisionOutcome) -> DecisionReport {
    DecisionReport::new(Uuid::new_v4(), DecisionType::TradeEntry, confidence, outcome)
}

pub fn decision_with_pnl(
    confidence: f64,
    outcome: DecisionOutcome,
    pnl: f64,
    strategy: &str,
) -> DecisionReport {
    decision(confidence, outcome)
        .with_pnl(pnl)
        .with_strategy(strategy)
}
