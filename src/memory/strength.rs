//! Memory strength under exponential decay.
//!
//! ```text
//! strength = importance · e^(−decay_rate · h_access) · boost
//! boost    = 1                              if h_created < 1
//!            min(1, 1 / ln(h_created + 1))  otherwise
//! ```
//!
//! `h_access` is hours since the last access and `h_created` hours since
//! creation. The result never exceeds `importance`, and with no access in
//! between it never increases over time.

use chrono::{DateTime, Utc};

pub mod constants {
    pub const SECONDS_PER_HOUR: f64 = 3600.0;

    /// Items younger than this get no recency adjustment
    pub const RECENCY_GRACE_HOURS: f64 = 1.0;

    /// Strength reported for associations known only from persisted links
    pub const DEFAULT_ASSOCIATION_STRENGTH: f64 = 0.5;
}

/// Fractional hours from `earlier` to `later`, never negative.
pub fn hours_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    let millis = (later - earlier).num_milliseconds().max(0) as f64;
    millis / 1000.0 / constants::SECONDS_PER_HOUR
}

pub fn recency_boost(hours_since_creation: f64) -> f64 {
    if hours_since_creation < constants::RECENCY_GRACE_HOURS {
        return 1.0;
    }
    (1.0 / (hours_since_creation + 1.0).ln()).min(1.0)
}

pub fn current_strength(
    importance: f64,
    decay_rate: f64,
    created_at: DateTime<Utc>,
    last_accessed: DateTime<Utc>,
    now: DateTime<Utc>,
) -> f64 {
    let since_access = hours_between(last_accessed, now);
    let since_creation = hours_between(created_at, now);

    let decayed = importance * (-decay_rate * since_access).exp();
    (decayed * recency_boost(since_creation)).min(importance)
}
