use std::io;

use thiserror::Error;

/// Failure of a single resolution attempt. Recoverable: the cycle is
/// counted but no sample reaches the aggregate.
#[derive(Debug, Error)]
pub enum ProbeFailure {
    #[error("{0:?} cannot be parsed as a domain name")]
    InvalidName(String),
    #[error("query for {name} failed: {source}")]
    Transport {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("query for {0} got no answer")]
    NoAnswer(String),
}

/// A read or write against the aggregate store failed mid-cycle.
#[derive(Debug, Error)]
#[error("store operation failed: {0:#}")]
pub struct StoreFailure(#[from] anyhow::Error);

/// Top-level error taxonomy.
///
/// `Configuration` and `Connectivity` are fatal and only ever raised before
/// the first worker starts. The rest are contained by the worker or the
/// coordinator that observed them.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("connectivity error: {0}")]
    Connectivity(String),
    #[error(transparent)]
    Probe(#[from] ProbeFailure),
    #[error(transparent)]
    Store(#[from] StoreFailure),
    #[error("worker for {domain} could not be started: {reason}")]
    WorkerStartup { domain: String, reason: String },
}

pub type Result<T, E = MonitorError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_errors_name_their_domain() {
        let err = MonitorError::from(ProbeFailure::InvalidName("bad..name".into()));
        assert_eq!(err.to_string(), "\"bad..name\" cannot be parsed as a domain name");

        let err = MonitorError::WorkerStartup { domain: "a.com".into(), reason: "task panicked".into() };
        assert_eq!(err.to_string(), "worker for a.com could not be started: task panicked");
    }

    #[test]
    fn store_failure_shows_context_chain() {
        let err = StoreFailure::from(anyhow::anyhow!("disk full").context("upserting aggregate for domain 3"));
        assert_eq!(err.to_string(), "store operation failed: upserting aggregate for domain 3: disk full");
    }
}
