//! Streaming latency statistics.
//!
//! Aggregates are folded one sample at a time so that no sample history
//! has to be kept: the mean uses the incremental form
//! `mean_n = mean_{n-1} + (x_n - mean_{n-1}) / n`, and the population
//! variance is carried through its standard deviation with
//!
//! ```text
//! n * var_n = (n-1) * var_{n-1} + (x_n - mean_n)^2 + (n-1) * (mean_{n-1} - mean_n)^2
//! ```

use chrono::{DateTime, Utc};

use crate::database::models::LatencyAggregate;

/// One successful latency measurement for a domain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub domain_id: i64,
    pub latency_ms: f64,
    pub observed_at: DateTime<Utc>,
}

impl Sample {
    /// Build a sample, rejecting failure markers.
    ///
    /// Negative, NaN and infinite latencies are what a failed probe looks
    /// like on the wire of older tooling (`-1`), so they never become a
    /// sample.
    pub fn new(domain_id: i64, latency_ms: f64, observed_at: DateTime<Utc>) -> Option<Self> {
        if !latency_ms.is_finite() || latency_ms < 0.0 {
            return None;
        }
        Some(Self { domain_id, latency_ms, observed_at })
    }
}

/// Fold `sample` into `prev`, where `None` means no sample was ever recorded.
pub fn update(prev: Option<&LatencyAggregate>, sample: &Sample) -> LatencyAggregate {
    let Some(prev) = prev.filter(|p| p.sample_count > 0) else {
        return LatencyAggregate {
            domain_id: sample.domain_id,
            mean_ms: sample.latency_ms,
            stdev_ms: 0.0,
            sample_count: 1,
            first_observed_at: sample.observed_at,
            last_observed_at: sample.observed_at,
        };
    };

    let n = prev.sample_count + 1;
    let weight = (n - 1) as f64;
    let x = sample.latency_ms;

    let mean = prev.mean_ms + (x - prev.mean_ms) / n as f64;
    let prev_var = prev.stdev_ms * prev.stdev_ms;
    let var = (weight * prev_var
        + (x - mean).powi(2)
        + weight * (prev.mean_ms - mean).powi(2))
        / n as f64;

    LatencyAggregate {
        domain_id: prev.domain_id,
        mean_ms: mean,
        // rounding can push a zero variance slightly negative
        stdev_ms: var.max(0.0).sqrt(),
        sample_count: n,
        first_observed_at: prev.first_observed_at,
        last_observed_at: prev.last_observed_at.max(sample.observed_at),
    }
}
