//! Thought journal recording, querying, archival and pattern detection.

mod test_helpers;

use anyhow::Result;
use chrono::{Duration, Utc};
use test_helpers::{market_thought, trade_entry, TestEnvironment};
use trading_cognition::journal::{
    ConfidenceLevel, DecisionType, EmotionalState, NewThought, PatternType, ThoughtQuery,
};
use trading_cognition::storage::collections;
use tracing_test::traced_test;

#[tokio::test]
#[traced_test]
async fn test_record_and_fetch_thought() -> Result<()> {
    let env = TestEnvironment::new();
    let journal = env.journal();

    let id = journal
        .record_thought(trade_entry("Buy BTC at 68k", "T-1"))
        .await
        .expect("thought should be recorded");

    let entry = journal.get_thought(id).await.expect("thought exists");
    assert_eq!(entry.decision_type, DecisionType::TradeEntry);
    assert_eq!(entry.trade_id.as_deref(), Some("T-1"));
    assert!(entry.follow_up_required);
    assert!(entry.outcome.is_none());
    assert_eq!(env.storage.collection_len(collections::THOUGHTS).await, 1);

    // Same id survives a cold cache
    journal.clear_cache().await;
    assert!(journal.get_thought(id).await.is_some());
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn test_blank_decision_rejected() {
    let env = TestEnvironment::new();
    let journal = env.journal();

    let thought = NewThought::new(
        "  ",
        "nothing",
        ConfidenceLevel::Medium,
        DecisionType::Learning,
    );
    assert!(journal.record_thought(thought).await.is_none());
}

#[tokio::test]
#[traced_test]
async fn test_outcome_update_is_idempotent() -> Result<()> {
    let env = TestEnvironment::new();
    let journal = env.journal();

    let id = journal
        .record_thought(trade_entry("Short ETH into resistance", "T-2"))
        .await
        .expect("recorded");
    assert_eq!(journal.get_thoughts_requiring_followup().await.len(), 1);

    assert!(
        journal
            .update_thought_outcome(id, "stopped out", Some("Entry was early"))
            .await
    );
    let first = journal.get_thought(id).await.expect("exists");

    assert!(
        journal
            .update_thought_outcome(id, "stopped out", Some("Entry was early"))
            .await
    );
    let second = journal.get_thought(id).await.expect("exists");

    assert_eq!(first, second);
    assert_eq!(second.outcome.as_deref(), Some("stopped out"));
    assert_eq!(second.reflection.as_deref(), Some("Entry was early"));
    assert!(journal.get_thoughts_requiring_followup().await.is_empty());
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn test_related_thoughts_share_words() -> Result<()> {
    let env = TestEnvironment::new();
    let journal = env.journal();

    let first = journal
        .record_thought(market_thought(
            "BTC breakout above weekly resistance",
            ConfidenceLevel::High,
        ))
        .await
        .expect("recorded");
    let second = journal
        .record_thought(market_thought(
            "BTC breakout retest of weekly resistance",
            ConfidenceLevel::High,
        ))
        .await
        .expect("recorded");

    let entry = journal.get_thought(second).await.expect("exists");
    assert_eq!(entry.related_thoughts, vec![first]);
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn test_search_by_type_emotion_and_confidence() -> Result<()> {
    let env = TestEnvironment::new();
    let journal = env.journal();

    journal
        .record_thought(market_thought("Range bound chop", ConfidenceLevel::Low))
        .await;
    journal
        .record_thought(
            market_thought("Clean trend on 4h", ConfidenceLevel::VeryHigh)
                .with_emotion(EmotionalState::Confident),
        )
        .await;
    journal
        .record_thought(trade_entry("Long SOL", "T-3"))
        .await;

    let analyses = journal
        .search_thoughts(ThoughtQuery {
            decision_type: Some(DecisionType::MarketAnalysis),
            ..Default::default()
        })
        .await;
    assert_eq!(analyses.len(), 2);

    let confident = journal
        .search_thoughts(ThoughtQuery {
            emotional_state: Some(EmotionalState::Confident),
            ..Default::default()
        })
        .await;
    assert_eq!(confident.len(), 1);
    assert_eq!(confident[0].decision, "Clean trend on 4h");

    let high = journal
        .search_thoughts(ThoughtQuery {
            confidence_range: Some((ConfidenceLevel::High, ConfidenceLevel::VeryHigh)),
            ..Default::default()
        })
        .await;
    assert_eq!(high.len(), 1);

    let text = journal
        .search_thoughts(ThoughtQuery {
            query: Some("sol".to_string()),
            limit: Some(5),
            ..Default::default()
        })
        .await;
    assert_eq!(text.len(), 1);
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn test_recent_thoughts_newest_first() -> Result<()> {
    let env = TestEnvironment::new();
    let journal = env.journal();

    for i in 0..3 {
        journal
            .record_thought(market_thought(&format!("Scan {i}"), ConfidenceLevel::Medium))
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let recent = journal.get_recent_thoughts(1, 2).await;
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].decision, "Scan 2");
    assert_eq!(recent[1].decision, "Scan 1");
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn test_recent_window_at_the_extremes() -> Result<()> {
    let env = TestEnvironment::new();
    let journal = env.journal();
    journal
        .record_thought(market_thought("Overnight gap", ConfidenceLevel::Medium))
        .await
        .expect("recorded");

    assert_eq!(journal.get_recent_thoughts(i64::MAX, 10).await.len(), 1);
    assert!(journal.get_recent_thoughts(i64::MIN, 10).await.is_empty());

    env.storage.set_unavailable(true);
    assert_eq!(journal.get_recent_thoughts(i64::MAX, 10).await.len(), 1);
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn test_archive_today() -> Result<()> {
    let env = TestEnvironment::new();
    let journal = env.journal();

    for i in 0..3 {
        journal
            .record_thought(market_thought(&format!("Note {i}"), ConfidenceLevel::Medium))
            .await;
    }

    let today = Utc::now().date_naive();
    assert!(journal.archive_daily_thoughts(today).await);
    let archived = env
        .storage
        .archive(&today.format("%Y-%m-%d").to_string())
        .await
        .expect("archive written");
    assert_eq!(archived.len(), 3);

    // An empty day is a successful no-op
    let last_year = today - Duration::days(365);
    assert!(journal.archive_daily_thoughts(last_year).await);
    assert!(env
        .storage
        .archive(&last_year.format("%Y-%m-%d").to_string())
        .await
        .is_none());
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn test_patterns_detected_after_minimum_entries() -> Result<()> {
    let env = TestEnvironment::new();
    let journal = env.journal();

    for i in 0..5 {
        journal
            .record_thought(market_thought(&format!("Unsure {i}"), ConfidenceLevel::VeryLow))
            .await;
    }
    for i in 0..4 {
        journal
            .record_thought(market_thought(&format!("Sure {i}"), ConfidenceLevel::VeryHigh))
            .await;
    }
    assert!(journal.recent_patterns().await.is_empty());

    journal
        .record_thought(market_thought("Sure 4", ConfidenceLevel::VeryHigh))
        .await;

    let patterns = journal.recent_patterns().await;
    let trend = patterns
        .iter()
        .find(|p| p.pattern_type == PatternType::ConfidenceTrend)
        .expect("confidence trend detected");
    assert_eq!(trend.description, "increasing confidence");

    let bias = patterns
        .iter()
        .find(|p| p.pattern_type == PatternType::DecisionTypeBias)
        .expect("type concentration detected");
    assert!(bias.description.contains("market_analysis"));

    // Repeating the same pattern does not record it again
    let before = journal.recent_patterns().await.len();
    journal
        .record_thought(market_thought("Sure 5", ConfidenceLevel::VeryHigh))
        .await;
    let after = journal.recent_patterns().await;
    assert_eq!(
        after
            .iter()
            .filter(|p| p.pattern_type == PatternType::DecisionTypeBias)
            .count(),
        1
    );
    assert!(after.len() >= before);
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn test_cache_serves_reads_during_outage() -> Result<()> {
    let env = TestEnvironment::new();
    let journal = env.journal();

    journal
        .record_thought(trade_entry("Buy dip", "T-4"))
        .await
        .expect("recorded");
    env.storage.set_unavailable(true);

    let id = journal
        .record_thought(trade_entry("Add to position", "T-4"))
        .await;
    assert!(id.is_some());

    assert_eq!(journal.get_recent_thoughts(1, 10).await.len(), 2);
    assert_eq!(journal.get_thoughts_requiring_followup().await.len(), 2);
    assert!(!journal.health_check().await);

    let stats = journal.statistics().await;
    assert_eq!(stats.cached_thoughts, 2);
    assert_eq!(stats.pending_follow_ups, 2);
    Ok(())
}
