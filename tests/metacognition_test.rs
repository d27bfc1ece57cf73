//! Decision review, systematic bias detection, learning metrics and
//! performance attribution through the engine.

mod test_helpers;

use anyhow::Result;
use approx::assert_relative_eq;
use test_helpers::{decision, decision_with_pnl, TestEnvironment};
use trading_cognition::journal::DecisionType;
use trading_cognition::metacognition::{
    AttributionReport, BiasType, DecisionOutcome, DecisionReport, LearningType,
};
use trading_cognition::storage::collections;
use tracing_test::traced_test;
use uuid::Uuid;

#[tokio::test]
#[traced_test]
async fn test_repeated_overconfident_failures_flag_bias_once() -> Result<()> {
    let env = TestEnvironment::new();
    let engine = env.metacognition();

    for i in 1..=12 {
        let outcome = engine
            .analyze_decision_detailed(decision(0.9, DecisionOutcome::Failure))
            .await
            .expect("report is valid");

        let overconfidence = outcome
            .new_biases
            .iter()
            .find(|b| b.bias_type == BiasType::Overconfidence);
        match i {
            1..=9 => assert!(outcome.new_biases.is_empty()),
            10 => {
                let bias = overconfidence.expect("bias detected at the tenth decision");
                assert!(bias.severity > 0.0);
                assert!(!bias.mitigation_suggestions.is_empty());
                assert_eq!(bias.related_decisions.len(), 10);
            }
            // Cooldown holds back repeats
            _ => assert!(overconfidence.is_none()),
        }
    }

    let recent = engine.recent_biases(10).await;
    assert_eq!(
        recent
            .iter()
            .filter(|b| b.bias_type == BiasType::Overconfidence)
            .count(),
        1
    );
    assert_eq!(
        env.storage.collection_len(collections::DECISION_ANALYSES).await,
        12
    );
    assert_eq!(
        env.storage.collection_len(collections::BIAS_DETECTIONS).await,
        recent.len()
    );
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn test_invalid_confidence_rejected() {
    let env = TestEnvironment::new();
    let engine = env.metacognition();

    assert!(engine
        .analyze_decision(decision(1.4, DecisionOutcome::Success))
        .await
        .is_none());
    assert_eq!(engine.cached_analyses().await, 0);
}

#[tokio::test]
#[traced_test]
async fn test_learning_metrics_track_category() -> Result<()> {
    let env = TestEnvironment::new();
    let engine = env.metacognition();

    for outcome in [
        DecisionOutcome::Failure,
        DecisionOutcome::PartialSuccess,
        DecisionOutcome::Success,
        DecisionOutcome::Success,
    ] {
        engine
            .analyze_decision(DecisionReport::new(
                Uuid::new_v4(),
                DecisionType::RiskAssessment,
                0.7,
                outcome,
            ))
            .await
            .expect("analyzed");
    }

    let metrics = engine.latest_learning_metrics().await;
    assert_eq!(metrics.len(), 1);
    let risk = &metrics[0];
    assert_eq!(risk.learning_type, LearningType::RiskManagement);
    assert_eq!(risk.sample_size, 4);
    assert!((0.0..=10.0).contains(&risk.skill_level));
    assert!(risk.improvement_rate > 0.0);
    assert!((0.0..=1.0).contains(&risk.confidence_calibration));
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn test_attribution_splits_pnl_by_strategy() -> Result<()> {
    let env = TestEnvironment::new();
    let engine = env.metacognition();

    engine
        .analyze_decision(
            decision_with_pnl(0.8, DecisionOutcome::Success, 300.0, "momentum")
                .with_context("market_condition", "trending"),
        )
        .await;
    engine
        .analyze_decision(decision_with_pnl(
            0.6,
            DecisionOutcome::Failure,
            -100.0,
            "momentum",
        ))
        .await;
    engine
        .analyze_decision(decision_with_pnl(
            0.5,
            DecisionOutcome::PartialSuccess,
            50.0,
            "mean_reversion",
        ))
        .await;
    // No P&L: ignored by attribution
    engine
        .analyze_decision(decision(0.5, DecisionOutcome::Pending))
        .await;

    let AttributionReport::Generated(attribution) =
        engine.generate_performance_attribution(7).await
    else {
        panic!("expected an attribution");
    };

    assert_eq!(attribution.decision_count, 3);
    assert_relative_eq!(attribution.total_pnl, 250.0);
    assert_relative_eq!(attribution.strategy_pnl["momentum"], 200.0);
    assert_relative_eq!(attribution.strategy_pnl["mean_reversion"], 50.0);
    assert_relative_eq!(attribution.market_condition_pnl["trending"], 300.0);
    assert_relative_eq!(attribution.market_condition_pnl["unknown"], -50.0);
    assert_relative_eq!(
        attribution.skill_attribution + attribution.luck_attribution,
        attribution.total_pnl,
        epsilon = 1e-9
    );
    assert!(attribution.skill_attribution <= attribution.total_pnl);
    assert_eq!(
        env.storage
            .collection_len(collections::PERFORMANCE_ATTRIBUTIONS)
            .await,
        1
    );
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn test_attribution_without_pnl_reports_insufficient_data() {
    let env = TestEnvironment::new();
    let engine = env.metacognition();

    engine
        .analyze_decision(decision(0.7, DecisionOutcome::Success))
        .await;

    assert!(matches!(
        engine.generate_performance_attribution(7).await,
        AttributionReport::InsufficientData { .. }
    ));
}

#[tokio::test]
#[traced_test]
async fn test_attribution_uses_cache_during_outage() -> Result<()> {
    let env = TestEnvironment::new();
    let engine = env.metacognition();

    engine
        .analyze_decision(decision_with_pnl(
            0.7,
            DecisionOutcome::Success,
            120.0,
            "breakout",
        ))
        .await
        .expect("analyzed");
    env.storage.set_unavailable(true);

    let AttributionReport::Generated(attribution) =
        engine.generate_performance_attribution(1).await
    else {
        panic!("cached analyses should be attributed");
    };
    assert_relative_eq!(attribution.total_pnl, 120.0);
    assert!(!engine.health_check().await);
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn test_attribution_buckets_by_market_sentiment() -> Result<()> {
    let env = TestEnvironment::new();
    let engine = env.metacognition();

    engine
        .analyze_decision(
            decision_with_pnl(0.7, DecisionOutcome::Success, 100.0, "momentum")
                .with_context("market_sentiment", "bullish"),
        )
        .await
        .expect("analyzed");
    engine
        .analyze_decision(
            decision_with_pnl(0.6, DecisionOutcome::Failure, -30.0, "momentum")
                .with_context("sentiment", -0.8),
        )
        .await
        .expect("analyzed");

    // An unbounded window neither panics nor drops anything
    let AttributionReport::Generated(attribution) =
        engine.generate_performance_attribution(i64::MAX).await
    else {
        panic!("expected an attribution");
    };
    assert_relative_eq!(attribution.market_condition_pnl["bullish"], 100.0);
    assert_relative_eq!(attribution.market_condition_pnl["bearish"], -30.0);
    assert!(!attribution.market_condition_pnl.contains_key("unknown"));
    Ok(())
}
