//! Per-decision bias indicators and systematic bias detection over a window
//! of analyses.

use super::models::{BiasDetection, BiasType, DecisionAnalysis, DecisionOutcome, DecisionReport};
use crate::config::BiasThresholds;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};

/// `clip(0.7·v + 0.3·(1 − |confidence − v|), 0, 1)` where `v` is the outcome value.
pub fn accuracy_score(confidence: f64, outcome: DecisionOutcome) -> f64 {
    let v = outcome.value();
    (0.7 * v + 0.3 * (1.0 - (confidence - v).abs())).clamp(0.0, 1.0)
}

fn context_number(context: &Map<String, Value>, key: &str) -> Option<f64> {
    context.get(key).and_then(Value::as_f64)
}

/// Flags raised by a single decision.
pub fn decision_indicators(report: &DecisionReport, thresholds: &BiasThresholds) -> Vec<BiasType> {
    let mut flags = Vec::new();

    if report.initial_confidence > thresholds.overconfidence_confidence
        && report.actual_outcome == DecisionOutcome::Failure
    {
        flags.push(BiasType::Overconfidence);
    }

    let time_in_position = context_number(&report.market_context, "time_in_position_minutes")
        .or(report.time_to_outcome);
    if report.profit_loss.is_some_and(|pnl| pnl < 0.0)
        && time_in_position.is_some_and(|minutes| minutes > thresholds.loss_aversion_minutes)
    {
        flags.push(BiasType::LossAversion);
    }

    if report.initial_confidence > thresholds.pattern_seeking_confidence
        && context_number(&report.market_context, "fundamental_score")
            .is_some_and(|score| score < thresholds.pattern_seeking_fundamental)
    {
        flags.push(BiasType::PatternSeeking);
    }

    flags
}

/// Market sentiment bucket from a decision's context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Sentiment {
    Bearish,
    Neutral,
    Bullish,
}

impl Sentiment {
    pub(crate) fn from_context(context: &Map<String, Value>) -> Option<Self> {
        if let Some(label) = context.get("market_sentiment").and_then(Value::as_str) {
            return match label.to_lowercase().as_str() {
                "bearish" => Some(Sentiment::Bearish),
                "neutral" => Some(Sentiment::Neutral),
                "bullish" => Some(Sentiment::Bullish),
                _ => None,
            };
        }
        context_number(context, "sentiment").map(|score| {
            if score < -0.3 {
                Sentiment::Bearish
            } else if score > 0.3 {
                Sentiment::Bullish
            } else {
                Sentiment::Neutral
            }
        })
    }

    pub(crate) fn label(self) -> &'static str {
        match self {
            Sentiment::Bearish => "bearish",
            Sentiment::Neutral => "neutral",
            Sentiment::Bullish => "bullish",
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}

fn ids(analyses: &[&DecisionAnalysis]) -> Vec<uuid::Uuid> {
    analyses.iter().map(|a| a.decision_id).collect()
}

/// Run every systematic detector over `window` (oldest first).
pub fn detect_systematic_biases(
    window: &[DecisionAnalysis],
    thresholds: &BiasThresholds,
) -> Vec<BiasDetection> {
    let mut detections = Vec::new();
    detections.extend(overconfidence(window, thresholds));
    detections.extend(confirmation(window, thresholds));
    detections.extend(recency(window, thresholds));
    detections.extend(overtrading(window, thresholds));
    detections
}

fn overconfidence(window: &[DecisionAnalysis], t: &BiasThresholds) -> Option<BiasDetection> {
    let high: Vec<&DecisionAnalysis> = window
        .iter()
        .filter(|a| a.initial_confidence > t.overconfidence_confidence)
        .collect();
    if high.len() < t.overconfidence_min_samples {
        return None;
    }

    let mean_confidence = mean(high.iter().map(|a| a.initial_confidence))?;
    let success_rate = high
        .iter()
        .filter(|a| a.actual_outcome == DecisionOutcome::Success)
        .count() as f64
        / high.len() as f64;
    let score = mean_confidence - success_rate;
    if score <= t.overconfidence_score {
        return None;
    }

    Some(BiasDetection::from_score(
        BiasType::Overconfidence,
        score,
        vec![format!(
            "{} high-confidence decisions averaged {:.2} confidence with a {:.2} success rate",
            high.len(),
            mean_confidence,
            success_rate
        )],
        ids(&high),
    ))
}

fn confirmation(window: &[DecisionAnalysis], t: &BiasThresholds) -> Vec<BiasDetection> {
    let mut buckets: BTreeMap<Sentiment, Vec<&DecisionAnalysis>> = BTreeMap::new();
    for analysis in window {
        if let Some(sentiment) = Sentiment::from_context(&analysis.market_context) {
            buckets.entry(sentiment).or_default().push(analysis);
        }
    }

    buckets
        .into_iter()
        .filter(|(_, bucket)| bucket.len() >= t.confirmation_min_bucket)
        .filter_map(|(sentiment, bucket)| {
            let strategies: HashSet<&str> = bucket
                .iter()
                .map(|a| a.strategy_used.as_deref().unwrap_or("unknown"))
                .collect();
            let diversity = strategies.len();

            let mean_confidence = mean(bucket.iter().map(|a| a.initial_confidence))?;
            let variance = mean(
                bucket
                    .iter()
                    .map(|a| (a.initial_confidence - mean_confidence).powi(2)),
            )?;

            if diversity > t.confirmation_max_diversity || variance >= t.confirmation_variance {
                return None;
            }
            let score = 1.0 - diversity as f64 / bucket.len() as f64;
            if score <= t.confirmation_score {
                return None;
            }

            Some(BiasDetection::from_score(
                BiasType::Confirmation,
                score,
                vec![format!(
                    "{} {} decisions used only {} strategies with confidence variance {:.3}",
                    bucket.len(),
                    sentiment.label(),
                    diversity,
                    variance
                )],
                ids(&bucket),
            ))
        })
        .collect()
}

fn recency(window: &[DecisionAnalysis], t: &BiasThresholds) -> Option<BiasDetection> {
    let needed = t.recency_recent_window + t.recency_prior_window;
    if window.len() < t.recency_min_decisions.max(needed) {
        return None;
    }

    let recent = &window[window.len() - t.recency_recent_window..];
    let prior = &window[window.len() - needed..window.len() - t.recency_recent_window];
    let recent_mean = mean(recent.iter().map(|a| a.initial_confidence))?;
    let prior_mean = mean(prior.iter().map(|a| a.initial_confidence))?;
    let shift = (recent_mean - prior_mean).abs();
    if shift <= t.recency_shift {
        return None;
    }

    let related: Vec<&DecisionAnalysis> = recent.iter().collect();
    Some(BiasDetection::from_score(
        BiasType::Recency,
        shift,
        vec![format!(
            "confidence moved from {:.2} to {:.2} over the last {} decisions",
            prior_mean,
            recent_mean,
            recent.len()
        )],
        ids(&related),
    ))
}

fn overtrading(window: &[DecisionAnalysis], t: &BiasThresholds) -> Option<BiasDetection> {
    let first = window.iter().map(|a| a.analyzed_at).min()?;
    let last = window.iter().map(|a| a.analyzed_at).max()?;

    // Span floored at one minute
    let span_hours = ((last - first).num_seconds().max(60)) as f64 / 3600.0;
    let frequency = window.len() as f64 / span_hours;
    let accuracy = mean(window.iter().map(|a| a.accuracy_score))?;

    if frequency <= t.overtrading_frequency_per_hour || accuracy >= t.overtrading_accuracy {
        return None;
    }
    let score = frequency * (1.0 - accuracy);
    if score <= t.overtrading_score {
        return None;
    }

    let related: Vec<&DecisionAnalysis> = window.iter().collect();
    Some(BiasDetection::from_score(
        BiasType::Overtrading,
        score,
        vec![format!(
            "{:.1} decisions per hour with mean accuracy {:.2}",
            frequency, accuracy
        )],
        ids(&related),
    ))
}
