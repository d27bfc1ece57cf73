use super::models::{BiasType, DecisionAnalysis, LearningMetric, LearningType};
use chrono::Utc;
use uuid::Uuid;

/// Same-category analyses needed before the rolling trend counts.
const MIN_TREND_SAMPLES: usize = 3;
/// Same-category analyses averaged for the trend.
const TREND_WINDOW: usize = 10;

/// Skill on a 0–10 scale. `history` holds same-category analyses, oldest
/// first, ending with the current one.
pub fn skill_level(accuracy: f64, history: &[&DecisionAnalysis]) -> f64 {
    let instant = accuracy * 5.0;
    if history.len() < MIN_TREND_SAMPLES {
        return instant.clamp(0.0, 10.0);
    }

    let recent = &history[history.len().saturating_sub(TREND_WINDOW)..];
    let trend = recent.iter().map(|a| a.accuracy_score).sum::<f64>() / recent.len() as f64 * 10.0;
    (0.7 * trend + 0.3 * instant).clamp(0.0, 10.0)
}

/// Least-squares slope of `samples` against their index.
pub fn improvement_rate(samples: &[f64]) -> f64 {
    let n = samples.len();
    if n < 2 {
        return 0.0;
    }

    let n_f = n as f64;
    let mean_x = (n_f - 1.0) / 2.0;
    let mean_y = samples.iter().sum::<f64>() / n_f;

    let (covariance, variance) = samples
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(cov, var), (i, y)| {
            let dx = i as f64 - mean_x;
            (cov + dx * (y - mean_y), var + dx * dx)
        });

    if variance == 0.0 {
        0.0
    } else {
        covariance / variance
    }
}

/// `1 − mean |confidence − accuracy|`.
pub fn confidence_calibration(history: &[&DecisionAnalysis]) -> f64 {
    if history.is_empty() {
        return 0.0;
    }
    let error = history
        .iter()
        .map(|a| (a.initial_confidence - a.accuracy_score).abs())
        .sum::<f64>()
        / history.len() as f64;
    (1.0 - error).clamp(0.0, 1.0)
}

fn areas_for_improvement(analysis: &DecisionAnalysis, calibration: f64) -> Vec<String> {
    let mut areas = Vec::new();
    if calibration < 0.7 {
        areas.push("Align stated confidence with realised accuracy".to_string());
    }
    if analysis.accuracy_score < 0.5 {
        areas.push(format!("Improve {} decisions", analysis.decision_type));
    }
    for bias in &analysis.bias_indicators {
        let area = match bias {
            BiasType::Overconfidence => "Temper conviction on uncertain setups",
            BiasType::LossAversion => "Cut losing positions sooner",
            BiasType::PatternSeeking => "Check fundamentals before trusting patterns",
            _ => continue,
        };
        areas.push(area.to_string());
    }
    areas
}

/// Metric for the category of `analysis`. `history` holds same-category
/// analyses ending with this one; `skill_samples` the recent skill levels
/// ending with the new one.
pub fn build_metric(
    analysis: &DecisionAnalysis,
    history: &[&DecisionAnalysis],
    skill_level: f64,
    skill_samples: &[f64],
) -> LearningMetric {
    let recent = &history[history.len().saturating_sub(TREND_WINDOW)..];
    let calibration = confidence_calibration(recent);

    LearningMetric {
        id: Uuid::new_v4(),
        learning_type: LearningType::from(analysis.decision_type),
        skill_level,
        improvement_rate: improvement_rate(skill_samples),
        confidence_calibration: calibration,
        key_learnings: analysis.learning_opportunities.clone(),
        areas_for_improvement: areas_for_improvement(analysis, calibration),
        sample_size: history.len(),
        recorded_at: Utc::now(),
    }
}
