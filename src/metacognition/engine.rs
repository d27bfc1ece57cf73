use super::attribution::compute_attribution;
use super::biases::{accuracy_score, decision_indicators, detect_systematic_biases};
use super::learning::{build_metric, skill_level};
use super::models::{
    AnalysisOutcome, AttributionReport, BiasDetection, BiasType, DecisionAnalysis,
    DecisionOutcome, DecisionReport, LearningMetric, LearningType,
};
use crate::config::MetacognitionConfig;
use crate::storage::{collections, window_start, Filter, Query, SortDirection, StorageBackend};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

const MAX_CACHED_BIASES: usize = 100;

/// Reviews completed decisions: scores accuracy, flags biases, tracks
/// learning per category and attributes P&L.
#[derive(Debug)]
pub struct MetacognitionEngine {
    storage: Arc<dyn StorageBackend>,
    config: MetacognitionConfig,
    analyses: RwLock<VecDeque<DecisionAnalysis>>,
    biases: RwLock<VecDeque<BiasDetection>>,
    last_recorded: RwLock<HashMap<BiasType, DateTime<Utc>>>,
    skill_history: RwLock<HashMap<LearningType, VecDeque<f64>>>,
    learning: RwLock<BTreeMap<LearningType, LearningMetric>>,
}

fn learning_opportunities(report: &DecisionReport, flags: &[BiasType]) -> Vec<String> {
    let mut opportunities = Vec::new();
    let confidence = report.initial_confidence;

    match report.actual_outcome {
        DecisionOutcome::Success if confidence < 0.5 => opportunities.push(
            "Succeeded despite low confidence; identify the signal that was underweighted"
                .to_string(),
        ),
        DecisionOutcome::Failure if confidence > 0.7 => opportunities.push(format!(
            "High-confidence {} failed; revisit the original thesis",
            report.decision_type
        )),
        DecisionOutcome::PartialSuccess => {
            opportunities.push("Partial success; review sizing and exit timing".to_string())
        }
        DecisionOutcome::Cancelled => opportunities
            .push("Decision was cancelled; check whether entry criteria were premature".to_string()),
        _ => {}
    }

    let gap = (confidence - report.actual_outcome.value()).abs();
    if gap > 0.3 {
        opportunities.push(format!(
            "Confidence {:.2} was {:.2} away from the outcome",
            confidence, gap
        ));
    }

    for flag in flags {
        opportunities.push(format!("Watch for {} bias", flag));
    }
    opportunities
}

impl MetacognitionEngine {
    pub fn new(config: MetacognitionConfig, storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            storage,
            config,
            analyses: RwLock::new(VecDeque::new()),
            biases: RwLock::new(VecDeque::new()),
            last_recorded: RwLock::new(HashMap::new()),
            skill_history: RwLock::new(HashMap::new()),
            learning: RwLock::new(BTreeMap::new()),
        }
    }

    async fn persist<T: Serialize>(&self, collection: &str, id: Uuid, item: &T) {
        let value = match serde_json::to_value(item) {
            Ok(value) => value,
            Err(e) => {
                warn!(collection, "Failed to serialize {}: {}", id, e);
                return;
            }
        };
        if let Err(e) = self
            .storage
            .store_item(collection, &id.to_string(), value, None)
            .await
        {
            warn!(collection, "Failed to persist {}: {}", id, e);
        }
    }

    pub async fn analyze_decision(&self, report: DecisionReport) -> Option<Uuid> {
        self.analyze_decision_detailed(report)
            .await
            .map(|outcome| outcome.analysis_id)
    }

    /// Analyse one decision and return any systematic biases it surfaced.
    pub async fn analyze_decision_detailed(&self, report: DecisionReport) -> Option<AnalysisOutcome> {
        if let Err(e) = report.validate() {
            warn!(decision_id = %report.decision_id, "Rejected decision report: {}", e);
            return None;
        }

        let flags = decision_indicators(&report, &self.config.thresholds);
        let analysis = DecisionAnalysis {
            id: Uuid::new_v4(),
            decision_id: report.decision_id,
            decision_type: report.decision_type,
            initial_confidence: report.initial_confidence,
            actual_outcome: report.actual_outcome,
            outcome_confidence: report.outcome_confidence,
            profit_loss: report.profit_loss,
            accuracy_score: accuracy_score(report.initial_confidence, report.actual_outcome),
            learning_opportunities: learning_opportunities(&report, &flags),
            bias_indicators: flags,
            strategy_used: report.strategy_used,
            market_context: report.market_context,
            time_to_outcome: report.time_to_outcome,
            analyzed_at: Utc::now(),
        };
        let analysis_id = analysis.id;

        self.persist(collections::DECISION_ANALYSES, analysis_id, &analysis)
            .await;

        info!(
            analysis_id = %analysis_id,
            decision_type = %analysis.decision_type,
            accuracy = analysis.accuracy_score,
            flags = analysis.bias_indicators.len(),
            "Analyzed decision"
        );

        let cached = {
            let mut analyses = self.analyses.write().await;
            analyses.push_back(analysis.clone());
            while analyses.len() > self.config.analysis_cache_size {
                analyses.pop_front();
            }
            analyses.len()
        };

        self.update_learning(&analysis).await;

        let new_biases = if cached >= self.config.min_decisions_for_bias_analysis {
            self.analyze_systematic_biases().await
        } else {
            Vec::new()
        };

        Some(AnalysisOutcome {
            analysis_id,
            new_biases,
        })
    }

    async fn update_learning(&self, analysis: &DecisionAnalysis) {
        let category = LearningType::from(analysis.decision_type);

        let history: Vec<DecisionAnalysis> = self
            .analyses
            .read()
            .await
            .iter()
            .filter(|a| LearningType::from(a.decision_type) == category)
            .cloned()
            .collect();
        let refs: Vec<&DecisionAnalysis> = history.iter().collect();
        let skill = skill_level(analysis.accuracy_score, &refs);

        let samples: Vec<f64> = {
            let mut skill_history = self.skill_history.write().await;
            let samples = skill_history.entry(category).or_default();
            samples.push_back(skill);
            while samples.len() > self.config.learning_window {
                samples.pop_front();
            }
            samples.iter().copied().collect()
        };

        let metric = build_metric(analysis, &refs, skill, &samples);
        debug!(
            category = ?category,
            skill = metric.skill_level,
            improvement_rate = metric.improvement_rate,
            "Updated learning metric"
        );
        self.persist(collections::LEARNING_METRICS, metric.id, &metric)
            .await;
        self.learning.write().await.insert(category, metric);
    }

    /// Run the systematic detectors over the most recent analyses. Returns
    /// only the detections recorded now; a type seen within the cooldown is
    /// skipped.
    pub async fn analyze_systematic_biases(&self) -> Vec<BiasDetection> {
        let window: Vec<DecisionAnalysis> = {
            let analyses = self.analyses.read().await;
            let skip = analyses.len().saturating_sub(self.config.bias_window);
            analyses.iter().skip(skip).cloned().collect()
        };
        if window.is_empty() {
            return Vec::new();
        }

        let cooldown = i64::try_from(self.config.bias_cooldown_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        let now = Utc::now();
        let mut recorded = Vec::new();

        for detection in detect_systematic_biases(&window, &self.config.thresholds) {
            {
                let mut last = self.last_recorded.write().await;
                if last
                    .get(&detection.bias_type)
                    .is_some_and(|at| now - *at < cooldown)
                {
                    debug!(bias = %detection.bias_type, "Bias still in cooldown");
                    continue;
                }
                last.insert(detection.bias_type, now);
            }

            warn!(
                bias = %detection.bias_type,
                severity = detection.severity,
                related = detection.related_decisions.len(),
                "Detected systematic bias"
            );
            self.persist(collections::BIAS_DETECTIONS, detection.id, &detection)
                .await;

            let mut biases = self.biases.write().await;
            biases.push_back(detection.clone());
            while biases.len() > MAX_CACHED_BIASES {
                biases.pop_front();
            }
            recorded.push(detection);
        }
        recorded
    }

    async fn analyses_since(&self, start: DateTime<Utc>) -> Vec<DecisionAnalysis> {
        let query = Query::new()
            .filter(Filter::gte("analyzed_at", start.to_rfc3339()))
            .order_by("analyzed_at", SortDirection::Ascending);

        match self
            .storage
            .query_collection(collections::DECISION_ANALYSES, &query)
            .await
        {
            Ok(documents) => documents
                .into_iter()
                .filter_map(|doc: Value| serde_json::from_value(doc).ok())
                .collect(),
            Err(e) => {
                warn!("Falling back to cached analyses: {}", e);
                self.analyses
                    .read()
                    .await
                    .iter()
                    .filter(|a| a.analyzed_at >= start)
                    .cloned()
                    .collect()
            }
        }
    }

    pub async fn generate_performance_attribution(&self, period_days: i64) -> AttributionReport {
        let period_end = Utc::now();
        let period_start = window_start(period_end, Duration::try_days(period_days.max(0)));

        let analyses = self.analyses_since(period_start).await;
        match compute_attribution(&analyses, period_start, period_end) {
            Some(attribution) => {
                info!(
                    total_pnl = attribution.total_pnl,
                    skill = attribution.skill_attribution,
                    luck = attribution.luck_attribution,
                    decisions = attribution.decision_count,
                    "Generated performance attribution"
                );
                self.persist(
                    collections::PERFORMANCE_ATTRIBUTIONS,
                    attribution.id,
                    &attribution,
                )
                .await;
                AttributionReport::Generated(attribution)
            }
            None => {
                debug!(period_days, "No decisions with P&L in attribution period");
                AttributionReport::InsufficientData {
                    period_start,
                    period_end,
                }
            }
        }
    }

    /// Most recent detections first.
    pub async fn recent_biases(&self, limit: usize) -> Vec<BiasDetection> {
        self.biases
            .read()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn latest_learning_metrics(&self) -> Vec<LearningMetric> {
        self.learning.read().await.values().cloned().collect()
    }

    pub async fn cached_analyses(&self) -> usize {
        self.analyses.read().await.len()
    }

    pub async fn clear_cache(&self) {
        self.analyses.write().await.clear();
        self.biases.write().await.clear();
        self.skill_history.write().await.clear();
        self.learning.write().await.clear();
        self.last_recorded.write().await.clear();
        debug!("Cleared metacognition caches");
    }

    /// True when the analyses collection is reachable.
    pub async fn health_check(&self) -> bool {
        let query = Query::new().limit(1);
        match self
            .storage
            .query_collection(collections::DECISION_ANALYSES, &query)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!("Metacognition health check failed: {}", e);
                false
            }
        }
    }
}
