//! Splits realised P&L over a period into skill, luck and bias components.

use super::biases::Sentiment;
use super::models::{DecisionAnalysis, PerformanceAttribution};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

const UNKNOWN: &str = "unknown";

/// Sentiment bucket when the context carries one, else the explicit
/// `market_condition` label.
fn market_condition(analysis: &DecisionAnalysis) -> String {
    if let Some(sentiment) = Sentiment::from_context(&analysis.market_context) {
        return sentiment.label().to_string();
    }
    analysis
        .market_context
        .get("market_condition")
        .and_then(|v| v.as_str())
        .unwrap_or(UNKNOWN)
        .to_string()
}

/// `None` when no analysis in the slice carries a P&L.
pub fn compute_attribution(
    analyses: &[DecisionAnalysis],
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
) -> Option<PerformanceAttribution> {
    let qualifying: Vec<(&DecisionAnalysis, f64)> = analyses
        .iter()
        .filter(|a| a.analyzed_at >= period_start && a.analyzed_at <= period_end)
        .filter_map(|a| a.profit_loss.map(|pnl| (a, pnl)))
        .collect();
    if qualifying.is_empty() {
        return None;
    }

    let count = qualifying.len() as f64;
    let total_pnl: f64 = qualifying.iter().map(|(_, pnl)| pnl).sum();

    let mut strategy_pnl: BTreeMap<String, f64> = BTreeMap::new();
    let mut market_condition_pnl: BTreeMap<String, f64> = BTreeMap::new();
    for (analysis, pnl) in &qualifying {
        let strategy = analysis.strategy_used.as_deref().unwrap_or(UNKNOWN);
        *strategy_pnl.entry(strategy.to_string()).or_default() += pnl;

        *market_condition_pnl
            .entry(market_condition(analysis))
            .or_default() += pnl;
    }

    let avg_accuracy = qualifying.iter().map(|(a, _)| a.accuracy_score).sum::<f64>() / count;
    let skill_attribution = (avg_accuracy * total_pnl).min(total_pnl);
    let luck_attribution = total_pnl - skill_attribution;

    let flagged = qualifying
        .iter()
        .filter(|(a, _)| !a.bias_indicators.is_empty())
        .count() as f64;
    let bias_fraction = flagged / count;
    let bias_impact = -bias_fraction * total_pnl.abs() * 0.1;

    let calibration_error =
        qualifying.iter().map(|(a, _)| a.calibration_error()).sum::<f64>() / count;
    let confidence_accuracy = (1.0 - calibration_error).clamp(0.0, 1.0);

    let mut strengths = Vec::new();
    let mut weaknesses = Vec::new();

    if avg_accuracy > 0.7 {
        strengths.push(format!("High decision quality ({avg_accuracy:.2})"));
    } else if avg_accuracy < 0.5 {
        weaknesses.push(format!("Low decision quality ({avg_accuracy:.2})"));
    }
    if confidence_accuracy > 0.8 {
        strengths.push("Well-calibrated confidence".to_string());
    } else if confidence_accuracy < 0.6 {
        weaknesses.push("Poorly calibrated confidence".to_string());
    }
    if total_pnl > 0.0 && skill_attribution / total_pnl > 0.6 {
        strengths.push("Profits driven mainly by skill".to_string());
    }
    if bias_fraction > 0.3 {
        weaknesses.push(format!(
            "Bias indicators on {:.0}% of decisions",
            bias_fraction * 100.0
        ));
    }
    for (strategy, pnl) in &strategy_pnl {
        if *pnl > 0.0 {
            strengths.push(format!("Strategy {strategy} profitable ({pnl:.2})"));
        } else if *pnl < 0.0 {
            weaknesses.push(format!("Strategy {strategy} losing ({pnl:.2})"));
        }
    }

    Some(PerformanceAttribution {
        id: Uuid::new_v4(),
        period_start,
        period_end,
        total_pnl,
        strategy_pnl,
        market_condition_pnl,
        skill_attribution,
        luck_attribution,
        bias_impact,
        decision_quality_score: avg_accuracy,
        confidence_accuracy,
        decision_count: qualifying.len(),
        strengths,
        weaknesses,
        generated_at: Utc::now(),
    })
}
