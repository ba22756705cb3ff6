//! Recurrent DNS latency monitor.
//!
//! Every target domain is probed on a fixed cadence with a cache-busted
//! query name, and each measured latency is folded into that domain's
//! running mean and standard deviation in a persistent store.

pub mod config;
pub mod coordinator;
pub mod database;
pub mod error;
pub mod gate;
pub mod monitoring;
pub mod pool;
pub mod resolver;
pub mod stats;

#[cfg(test)]
mod testing;

pub use coordinator::{ExecutionMode, MonitorCoordinator, RunReport};
pub use error::{MonitorError, ProbeFailure, StoreFailure};
pub use gate::StoreGate;
pub use monitoring::{DomainProbeWorker, RunConfig};
