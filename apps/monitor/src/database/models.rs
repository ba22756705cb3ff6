use chrono::{DateTime, Utc};

/// A monitored target, loaded once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    pub id: i64,
    pub name: String,
}

impl Domain {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self { id, name: name.into() }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (#{})", self.name, self.id)
    }
}

/// Running latency statistics for one domain.
///
/// A row only exists once at least one sample was recorded, so a loaded
/// aggregate always has `sample_count >= 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyAggregate {
    pub domain_id: i64,
    pub mean_ms: f64,
    pub stdev_ms: f64,
    pub sample_count: u64,
    pub first_observed_at: DateTime<Utc>,
    pub last_observed_at: DateTime<Utc>,
}

/// Aggregate joined with its domain, as listed by `stats`.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainStats {
    pub domain: Domain,
    pub rank: i64,
    pub aggregate: Option<LatencyAggregate>,
}

/// Convert a timestamp to the unix milliseconds stored in the database
pub fn timestamp_to_i64(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

/// Convert stored unix milliseconds back to a timestamp
pub fn i64_to_timestamp(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::UNIX_EPOCH)
}
