use super::{ComponentHealth, HealthStatus, SystemHealth};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

#[derive(Debug, Clone)]
pub struct HealthThresholds {
    /// A passing probe slower than this reports degraded
    pub max_response_time_ms: u64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            max_response_time_ms: 1000,
        }
    }
}

/// Times component probes and folds them into a [`SystemHealth`]. Failure
/// counts are cumulative for the checker's lifetime.
#[derive(Debug)]
pub struct HealthChecker {
    start_time: SystemTime,
    thresholds: HealthThresholds,
    error_counts: Mutex<HashMap<String, u64>>,
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthChecker {
    pub fn new() -> Self {
        Self {
            start_time: SystemTime::now(),
            thresholds: HealthThresholds::default(),
            error_counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_thresholds(mut self, thresholds: HealthThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time
            .elapsed()
            .unwrap_or_else(|_| Duration::from_secs(0))
            .as_secs()
    }

    /// Run one probe and record how it went.
    pub async fn check_component<F>(&self, name: &str, probe: F) -> ComponentHealth
    where
        F: Future<Output = bool>,
    {
        let start = Instant::now();
        let passed = probe.await;
        let response_time_ms = start.elapsed().as_millis() as u64;

        let error_count = {
            let mut counts = self.error_counts.lock().await;
            let count = counts.entry(name.to_string()).or_insert(0);
            if !passed {
                *count += 1;
            }
            *count
        };

        let (status, message) = if !passed {
            (HealthStatus::Unhealthy, Some(format!("{name} check failed")))
        } else if response_time_ms > self.thresholds.max_response_time_ms {
            warn!(component = name, response_time_ms, "Slow health probe");
            (
                HealthStatus::Degraded,
                Some(format!("Slow response: {response_time_ms}ms")),
            )
        } else {
            (HealthStatus::Healthy, None)
        };

        ComponentHealth {
            status,
            message,
            last_checked: Utc::now(),
            response_time_ms: Some(response_time_ms),
            error_count,
        }
    }

    /// Overall status is the worst component status.
    pub fn aggregate(&self, components: BTreeMap<String, ComponentHealth>) -> SystemHealth {
        for (name, health) in &components {
            match health.status {
                HealthStatus::Unhealthy => {
                    error!("Component {} is unhealthy: {:?}", name, health.message)
                }
                HealthStatus::Degraded => {
                    warn!("Component {} is degraded: {:?}", name, health.message)
                }
                HealthStatus::Healthy => debug!("Component {} is healthy", name),
            }
        }

        let status = components
            .values()
            .map(|health| health.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        SystemHealth {
            status,
            timestamp: Utc::now(),
            components,
            uptime_seconds: self.uptime_seconds(),
        }
    }
}

/// Condensed health for the CLI.
#[derive(Debug, Serialize, Deserialize)]
pub struct SimpleHealthResponse {
    pub status: String,
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub failing: Vec<String>,
}

impl From<&SystemHealth> for SimpleHealthResponse {
    fn from(health: &SystemHealth) -> Self {
        Self {
            status: health.status.to_string(),
            timestamp: health.timestamp.to_rfc3339(),
            uptime_seconds: health.uptime_seconds,
            failing: health
                .failing_components()
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_probe_is_unhealthy_and_counted() {
        let checker = HealthChecker::new();
        let first = checker.check_component("storage", async { false }).await;
        assert_eq!(first.status, HealthStatus::Unhealthy);
        assert_eq!(first.error_count, 1);

        let second = checker.check_component("storage", async { false }).await;
        assert_eq!(second.error_count, 2);

        let ok = checker.check_component("storage", async { true }).await;
        assert_eq!(ok.status, HealthStatus::Healthy);
        assert_eq!(ok.error_count, 2);
    }

    #[tokio::test]
    async fn test_slow_probe_is_degraded() {
        let checker = HealthChecker::new().with_thresholds(HealthThresholds {
            max_response_time_ms: 0,
        });
        let health = checker
            .check_component("memory", async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                true
            })
            .await;
        assert_eq!(health.status, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_overall_status_is_worst() {
        let checker = HealthChecker::new();
        let mut components = BTreeMap::new();
        components.insert(
            "journal".to_string(),
            checker.check_component("journal", async { true }).await,
        );
        components.insert(
            "storage".to_string(),
            checker.check_component("storage", async { false }).await,
        );

        let health = checker.aggregate(components);
        assert_eq!(health.status, HealthStatus::Unhealthy);

        let simple = SimpleHealthResponse::from(&health);
        assert_eq!(simple.status, "unhealthy");
        assert_eq!(simple.failing, vec!["storage".to_string()]);
    }

    #[test]
    fn test_empty_is_healthy() {
        let health = HealthChecker::new().aggregate(BTreeMap::new());
        assert!(health.is_healthy());
    }
}
