use std::time::Duration;

use crate::database::{Domain, LatencyAggregate};

/// Cadence shared by every worker of a run. Handed to each worker by
/// value when it is built and never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunConfig {
    /// Pause between two cycles of the same domain.
    pub frequency: Duration,
    /// Cycles per domain; 0 runs until cancelled.
    pub cycles: u64,
}

impl RunConfig {
    pub const DEFAULT_FREQUENCY_SECS: u64 = 60;

    pub fn new(frequency_secs: u64, cycles: u64) -> Self {
        Self { frequency: Duration::from_secs(frequency_secs), cycles }
    }

    /// A frequency under one second is the no-op configuration: workers
    /// stop before their first cycle.
    pub fn is_noop(&self) -> bool {
        self.frequency < Duration::from_secs(1)
    }

    pub fn is_unbounded(&self) -> bool {
        self.cycles == 0
    }

    /// Whether `completed` cycles exhaust the limit.
    pub fn is_exhausted(&self, completed: u64) -> bool {
        !self.is_unbounded() && completed >= self.cycles
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_FREQUENCY_SECS, 0)
    }
}

/// Where a worker is in its probe cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Probing,
    Aggregating,
    Sleeping,
    Stopped,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerState::Idle => write!(f, "idle"),
            WorkerState::Probing => write!(f, "probing"),
            WorkerState::Aggregating => write!(f, "aggregating"),
            WorkerState::Sleeping => write!(f, "sleeping"),
            WorkerState::Stopped => write!(f, "stopped"),
        }
    }
}

/// What one probe cycle did to the aggregate.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The sample was folded in; carries the aggregate as written.
    Recorded(LatencyAggregate),
    /// The probe failed; the aggregate was not touched.
    ProbeFailed,
    /// The probe succeeded but the store rejected the read or the write.
    StoreFailed,
}

/// Tally of a worker's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub domain: Domain,
    pub cycles_completed: u64,
    pub samples_recorded: u64,
    pub probe_failures: u64,
    pub store_failures: u64,
}

impl WorkerReport {
    pub fn new(domain: Domain) -> Self {
        Self { domain, cycles_completed: 0, samples_recorded: 0, probe_failures: 0, store_failures: 0 }
    }

    pub fn record(&mut self, outcome: &CycleOutcome) {
        self.cycles_completed += 1;
        match outcome {
            CycleOutcome::Recorded(_) => self.samples_recorded += 1,
            CycleOutcome::ProbeFailed => self.probe_failures += 1,
            CycleOutcome::StoreFailed => self.store_failures += 1,
        }
    }
}
