/// Probe engine - one worker per monitored domain
///
/// A worker repeatedly:
/// - builds a cache-busting query name for its domain
/// - times one resolution through the `Resolver`
/// - folds the sample into the domain's aggregate through the `StoreGate`
/// - sleeps until the next cycle is due
pub mod types;
pub mod worker;

pub use types::{CycleOutcome, RunConfig, WorkerReport, WorkerState};
pub use worker::DomainProbeWorker;
