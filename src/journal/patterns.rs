//! Lightweight behavioural patterns over the most recent journal entries.

use super::models::{DecisionType, PatternType, ThoughtEntry, ThoughtPattern};
use crate::config::JournalConfig;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

/// Entries are ordered oldest first.
pub fn detect_patterns(entries: &[ThoughtEntry], config: &JournalConfig) -> Vec<ThoughtPattern> {
    if entries.len() < config.pattern_min_entries {
        return Vec::new();
    }

    confidence_trend(entries, config)
        .into_iter()
        .chain(type_concentration(entries, config))
        .collect()
}

fn mean_confidence(entries: &[ThoughtEntry]) -> f64 {
    entries.iter().map(|e| e.confidence.value()).sum::<f64>() / entries.len() as f64
}

/// Compare the average confidence of the newest window with the one before it.
fn confidence_trend(entries: &[ThoughtEntry], config: &JournalConfig) -> Option<ThoughtPattern> {
    let window = config.confidence_window;
    if window == 0 || entries.len() < window * 2 {
        return None;
    }

    let recent = &entries[entries.len() - window..];
    let previous = &entries[entries.len() - window * 2..entries.len() - window];
    let delta = mean_confidence(recent) - mean_confidence(previous);
    if delta.abs() <= config.confidence_trend_threshold {
        return None;
    }

    let direction = if delta > 0.0 { "increasing" } else { "decreasing" };
    Some(ThoughtPattern {
        id: Uuid::new_v4(),
        pattern_type: PatternType::ConfidenceTrend,
        description: format!("{direction} confidence"),
        strength: delta.abs(),
        supporting_thoughts: previous.iter().chain(recent).map(|e| e.id).collect(),
        detected_at: Utc::now(),
    })
}

/// Flag a single decision type dominating the recent entries.
fn type_concentration(entries: &[ThoughtEntry], config: &JournalConfig) -> Option<ThoughtPattern> {
    let window = config.type_concentration_window.min(entries.len());
    if window == 0 {
        return None;
    }
    let recent = &entries[entries.len() - window..];

    let mut counts: BTreeMap<DecisionType, usize> = BTreeMap::new();
    for entry in recent {
        *counts.entry(entry.decision_type).or_default() += 1;
    }
    let (dominant, count) = counts.into_iter().max_by_key(|(_, count)| *count)?;

    let share = count as f64 / window as f64;
    if share <= config.type_concentration_threshold {
        return None;
    }

    Some(ThoughtPattern {
        id: Uuid::new_v4(),
        pattern_type: PatternType::DecisionTypeBias,
        description: format!("bias toward {dominant}"),
        strength: share,
        supporting_thoughts: recent
            .iter()
            .filter(|e| e.decision_type == dominant)
            .map(|e| e.id)
            .collect(),
        detected_at: Utc::now(),
    })
}

/// Distinct lowercase words of a thought's decision and reasoning.
pub fn word_set(entry_text: &str) -> HashSet<String> {
    entry_text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::models::{ConfidenceLevel, EmotionalState};
    use serde_json::Map;

    fn entry(decision_type: DecisionType, confidence: ConfidenceLevel) -> ThoughtEntry {
        ThoughtEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            decision: "d".to_string(),
            reasoning: String::new(),
            confidence,
            emotional_state: EmotionalState::Neutral,
            market_context: Map::new(),
            decision_type,
            importance_score: 1.0,
            follow_up_required: false,
            tags: Vec::new(),
            related_thoughts: Vec::new(),
            strategy_id: None,
            trade_id: None,
            outcome: None,
            reflection: None,
        }
    }

    #[test]
    fn test_nothing_below_minimum_entries() {
        let entries: Vec<_> = (0..9)
            .map(|_| entry(DecisionType::TradeEntry, ConfidenceLevel::High))
            .collect();
        assert!(detect_patterns(&entries, &JournalConfig::default()).is_empty());
    }

    #[test]
    fn test_rising_confidence_is_flagged() {
        let mut entries: Vec<_> = (0..5)
            .map(|_| entry(DecisionType::MarketAnalysis, ConfidenceLevel::Low))
            .collect();
        entries.extend((0..5).map(|_| entry(DecisionType::Learning, ConfidenceLevel::High)));

        let patterns = detect_patterns(&entries, &JournalConfig::default());
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].pattern_type, PatternType::ConfidenceTrend);
        assert_eq!(patterns[0].description, "increasing confidence");
    }

    #[test]
    fn test_type_concentration_is_flagged() {
        let mut entries: Vec<_> = (0..7)
            .map(|_| entry(DecisionType::TradeEntry, ConfidenceLevel::Medium))
            .collect();
        entries.extend((0..3).map(|_| entry(DecisionType::RiskAssessment, ConfidenceLevel::Medium)));

        let patterns = detect_patterns(&entries, &JournalConfig::default());
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].description, "bias toward trade_entry");
        assert_eq!(patterns[0].supporting_thoughts.len(), 7);
    }

    #[test]
    fn test_word_set() {
        let words = word_set("Buy BTC: breakout, buy volume!");
        assert_eq!(words.len(), 4);
        assert!(words.contains("btc"));
    }
}
