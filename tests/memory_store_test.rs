//! Tiered memory behaviour against the in-memory backend.

mod test_helpers;

use anyhow::Result;
use approx::assert_relative_eq;
use chrono::{Duration, Utc};
use test_helpers::TestEnvironment;
use trading_cognition::memory::{
    ImportanceLevel, MemoryItem, MemoryTier, SearchQuery, StoreMemoryRequest,
};
use trading_cognition::StorageBackend;
use tracing_test::traced_test;

fn working(content: &str, importance: ImportanceLevel) -> StoreMemoryRequest {
    StoreMemoryRequest::new(content, MemoryTier::Working, importance)
}

#[tokio::test]
#[traced_test]
async fn test_fresh_working_memory_has_full_strength() -> Result<()> {
    let env = TestEnvironment::new();
    let store = env.memory_store();

    let id = store
        .store_memory(working("BTC broke 70k on heavy volume", ImportanceLevel::Medium))
        .await
        .expect("memory should be stored");

    let item = store.retrieve_memory(id).await.expect("memory should exist");
    assert_eq!(item.tier, MemoryTier::Working);
    assert_relative_eq!(item.current_strength(Utc::now()), 2.0, epsilon = 1e-3);
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn test_blank_content_is_rejected() {
    let env = TestEnvironment::new();
    let store = env.memory_store();

    assert!(store
        .store_memory(working("   ", ImportanceLevel::High))
        .await
        .is_none());
    assert_eq!(store.working_len().await, 0);
}

#[tokio::test]
#[traced_test]
async fn test_working_capacity_evicts_to_short_term() -> Result<()> {
    let env = TestEnvironment::new();
    let store = env.memory_store();
    let capacity = env.config.memory.working_capacity;

    let mut ids = Vec::new();
    for i in 0..=capacity {
        let id = store
            .store_memory(working(&format!("observation {i}"), ImportanceLevel::Medium))
            .await
            .expect("memory should be stored");
        ids.push(id);
    }

    assert_eq!(store.working_len().await, capacity);

    // Oldest of equally strong items goes first
    let evicted = store.retrieve_memory(ids[0]).await.expect("evicted item kept");
    assert_eq!(evicted.tier, MemoryTier::ShortTerm);
    assert_eq!(
        env.storage
            .collection_len(MemoryTier::ShortTerm.collection())
            .await,
        1
    );
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn test_weakest_item_is_evicted_first() -> Result<()> {
    let env = TestEnvironment::new();
    let store = env.memory_store();

    let weak = store
        .store_memory(working("minor wick on ETH", ImportanceLevel::Low))
        .await
        .expect("stored");
    for i in 0..env.config.memory.working_capacity {
        store
            .store_memory(working(&format!("key level {i}"), ImportanceLevel::High))
            .await
            .expect("stored");
    }

    let working_ids: Vec<_> = store.working_items().await.iter().map(|i| i.id).collect();
    assert!(!working_ids.contains(&weak));
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn test_strong_short_term_memory_promoted_on_retrieval() -> Result<()> {
    let env = TestEnvironment::new();
    let store = env.memory_store();

    let id = store
        .store_memory(StoreMemoryRequest::new(
            "Flash crash playbook",
            MemoryTier::ShortTerm,
            ImportanceLevel::Critical,
        ))
        .await
        .expect("stored");

    let item = store.retrieve_memory(id).await.expect("found");
    assert_eq!(item.tier, MemoryTier::Working);
    assert!(store.working_items().await.iter().any(|i| i.id == id));
    assert_eq!(
        env.storage
            .collection_len(MemoryTier::ShortTerm.collection())
            .await,
        0
    );
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn test_weak_short_term_memory_stays_put() -> Result<()> {
    let env = TestEnvironment::new();
    let store = env.memory_store();

    let id = store
        .store_memory(StoreMemoryRequest::new(
            "Funding rate slightly positive",
            MemoryTier::ShortTerm,
            ImportanceLevel::Low,
        ))
        .await
        .expect("stored");

    let item = store.retrieve_memory(id).await.expect("found");
    assert_eq!(item.tier, MemoryTier::ShortTerm);
    assert_eq!(store.working_len().await, 0);
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn test_search_filters_by_text_and_tags() -> Result<()> {
    let env = TestEnvironment::new();
    let store = env.memory_store();

    store
        .store_memory(
            working("BTC support at 65k held", ImportanceLevel::High).with_tags(["btc", "levels"]),
        )
        .await;
    store
        .store_memory(
            StoreMemoryRequest::new(
                "BTC dominance rising",
                MemoryTier::LongTerm,
                ImportanceLevel::Medium,
            )
            .with_tags(["btc"]),
        )
        .await;
    store
        .store_memory(working("ETH gas spike", ImportanceLevel::Medium).with_tags(["eth"]))
        .await;

    let btc = store.search_memories(SearchQuery::new("btc")).await;
    assert_eq!(btc.len(), 2);
    // Strongest first
    assert_eq!(btc[0].importance, ImportanceLevel::High);

    let tagged = store
        .search_memories(SearchQuery::new("").with_tags(["levels"]))
        .await;
    assert_eq!(tagged.len(), 1);

    let long_term = store
        .search_memories(SearchQuery::new("btc").in_tier(MemoryTier::LongTerm))
        .await;
    assert_eq!(long_term.len(), 1);
    assert_eq!(long_term[0].tier, MemoryTier::LongTerm);
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn test_associations_are_bidirectional() -> Result<()> {
    let env = TestEnvironment::new();
    let store = env.memory_store();

    let a = store
        .store_memory(working("CPI print hot", ImportanceLevel::High))
        .await
        .expect("stored");
    let b = store
        .store_memory(StoreMemoryRequest::new(
            "Rates repriced higher",
            MemoryTier::LongTerm,
            ImportanceLevel::Medium,
        ))
        .await
        .expect("stored");

    assert!(store.create_memory_association(a, b, 0.8).await);
    assert!(!store.create_memory_association(a, a, 0.8).await);
    assert!(!store.create_memory_association(a, b, 1.5).await);

    let from_a = store.get_associated_memories(a).await;
    assert_eq!(from_a.len(), 1);
    assert_eq!(from_a[0].0, b);
    assert_relative_eq!(from_a[0].1, 0.8);

    let from_b = store.get_associated_memories(b).await;
    assert_eq!(from_b[0].0, a);
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn test_consolidation_expires_stale_and_promotes_strong() -> Result<()> {
    let env = TestEnvironment::new();
    let store = env.memory_store();
    let rates = &env.config.memory.decay_rates;

    let mut stale = MemoryItem::new(
        StoreMemoryRequest::new("Old chatter", MemoryTier::ShortTerm, ImportanceLevel::Low),
        rates.short_term,
    );
    stale.created_at = Utc::now() - Duration::hours(100);
    stale.last_accessed = stale.created_at;
    env.storage
        .store_item(
            MemoryTier::ShortTerm.collection(),
            &stale.id.to_string(),
            serde_json::to_value(&stale)?,
            None,
        )
        .await?;

    let lesson = store
        .store_memory(StoreMemoryRequest::new(
            "Never average down into a halted market",
            MemoryTier::ShortTerm,
            ImportanceLevel::Critical,
        ))
        .await
        .expect("stored");

    let report = store.force_consolidate().await;
    assert!(!report.skipped);
    assert_eq!(report.expired, 1);
    assert_eq!(report.promoted, 1);
    assert!(report.snapshot_written);

    let promoted = store
        .search_memories(SearchQuery::new("halted").in_tier(MemoryTier::LongTerm))
        .await;
    assert_eq!(promoted.len(), 1);
    assert_eq!(promoted[0].id, lesson);
    assert_eq!(
        env.storage
            .collection_len(MemoryTier::ShortTerm.collection())
            .await,
        0
    );
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn test_consolidation_is_rate_limited() {
    let env = TestEnvironment::new();
    let store = env.memory_store();

    assert!(!store.consolidate().await.skipped);
    assert!(store.consolidate().await.skipped);
    assert!(!store.force_consolidate().await.skipped);
    assert_eq!(env.storage.snapshot_count().await, 2);
}

#[tokio::test]
#[traced_test]
async fn test_snapshot_restores_working_memory() -> Result<()> {
    let env = TestEnvironment::new();
    let store = env.memory_store();
    store
        .store_memory(working("Open BTC long at 68k", ImportanceLevel::High))
        .await
        .expect("stored");

    let snapshot = store.build_snapshot().await;
    store.clear_caches().await;
    assert_eq!(store.working_len().await, 0);

    let fresh = env.memory_store();
    assert_eq!(fresh.restore_from_snapshot(&snapshot).await, 1);
    assert_eq!(fresh.working_len().await, 1);
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn test_storage_outage_degrades_quietly() {
    let env = TestEnvironment::new();
    let store = env.memory_store();
    env.storage.set_unavailable(true);

    assert!(store
        .store_memory(StoreMemoryRequest::new(
            "unreachable",
            MemoryTier::LongTerm,
            ImportanceLevel::Low,
        ))
        .await
        .is_none());
    assert!(store.search_memories(SearchQuery::new("x")).await.is_empty());
    assert!(!store.health_check().await);
}
