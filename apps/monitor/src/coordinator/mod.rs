//! Coordinator module - owns the target set and the worker lifecycle
//!
//! The coordinator:
//! - loads the fixed target list once, at startup
//! - builds one `DomainProbeWorker` per domain with an immutable `RunConfig`
//! - runs the workers concurrently (one task per domain) or, as a fallback,
//!   sequentially, one cycle at a time
//! - waits for every worker to stop and gathers their reports
//!
//! Cancellation is cooperative: `stop()` fires a token every worker watches
//! at its suspension points.


use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::database::Domain;
use crate::error::MonitorError;
use crate::gate::StoreGate;
use crate::monitoring::{DomainProbeWorker, RunConfig, WorkerReport};
use crate::resolver::Resolver;

/// How workers are scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One task per domain; probes overlap, store access does not.
    #[default]
    Concurrent,
    /// All domains probed one after another on a single task. Same
    /// aggregates, lower throughput.
    Sequential,
}

/// A domain whose worker never got going or died before stopping.
#[derive(Debug)]
pub struct StartupFailure {
    pub domain: Domain,
    pub error: MonitorError,
}

/// Outcome of a whole run.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Reports of workers that reached `Stopped`, in target order.
    pub workers: Vec<WorkerReport>,
    pub failed_to_start: Vec<StartupFailure>,
}

impl RunReport {
    pub fn worker(&self, domain_id: i64) -> Option<&WorkerReport> {
        self.workers.iter().find(|w| w.domain.id == domain_id)
    }

    pub fn total_samples(&self) -> u64 {
        self.workers.iter().map(|w| w.samples_recorded).sum()
    }

    pub fn total_cycles(&self) -> u64 {
        self.workers.iter().map(|w| w.cycles_completed).sum()
    }
}

/// Main coordinator for a monitoring run
pub struct MonitorCoordinator {
    domains: Vec<Domain>,
    resolver: Arc<dyn Resolver>,
    store: Arc<StoreGate>,
    cancel: CancellationToken,
}

impl MonitorCoordinator {
    pub fn new(domains: Vec<Domain>, resolver: Arc<dyn Resolver>, store: Arc<StoreGate>) -> Self {
        Self { domains, resolver, store, cancel: CancellationToken::new() }
    }

    /// Build a coordinator over the store's `top_n` domains.
    ///
    /// An unreadable target list means the store is unreachable, which is
    /// fatal before any worker exists.
    pub async fn load(
        store: Arc<StoreGate>,
        resolver: Arc<dyn Resolver>,
        top_n: usize,
    ) -> Result<Self, MonitorError> {
        let domains = store
            .top_domains(top_n)
            .await
            .map_err(|e| MonitorError::Connectivity(format!("cannot load target domains: {e}")))?;

        info!("Loaded {} target domains", domains.len());
        Ok(Self::new(domains, resolver, store))
    }

    pub fn domains(&self) -> &[Domain] {
        &self.domains
    }

    /// Token that stops every worker of this coordinator when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Run every domain with `config` and wait until all workers stopped.
    pub async fn start(&self, config: RunConfig, mode: ExecutionMode) -> RunReport {
        if config.is_noop() {
            warn!("Probe frequency is below one second; no cycles will run");
        }
        info!(
            domains = self.domains.len(),
            frequency_secs = config.frequency.as_secs(),
            cycles = config.cycles,
            ?mode,
            "Starting monitor"
        );

        let mut report = RunReport::default();
        let workers = self.build_workers(config, &mut report);

        match mode {
            ExecutionMode::Concurrent => self.run_concurrent(workers, &mut report).await,
            ExecutionMode::Sequential => self.run_sequential(workers, config, &mut report).await,
        }

        let order = |w: &WorkerReport| self.domains.iter().position(|d| d.id == w.domain.id);
        report.workers.sort_by_key(order);

        info!(
            workers = report.workers.len(),
            failed = report.failed_to_start.len(),
            samples = report.total_samples(),
            "Monitor stopped"
        );
        report
    }

    fn build_workers(&self, config: RunConfig, report: &mut RunReport) -> Vec<DomainProbeWorker> {
        let mut workers = Vec::with_capacity(self.domains.len());
        for domain in &self.domains {
            match DomainProbeWorker::new(domain.clone(), self.resolver.clone(), self.store.clone(), config) {
                Ok(worker) => workers.push(worker),
                Err(error) => {
                    warn!("Skipping {}: {}", domain, error);
                    report.failed_to_start.push(StartupFailure { domain: domain.clone(), error });
                }
            }
        }
        workers
    }

    async fn run_concurrent(&self, workers: Vec<DomainProbeWorker>, report: &mut RunReport) {
        let handles: Vec<_> = workers
            .into_iter()
            .map(|worker| {
                let domain = worker.domain().clone();
                (domain, tokio::spawn(worker.run(self.cancel.clone())))
            })
            .collect();

        for (domain, handle) in handles {
            match handle.await {
                Ok(worker_report) => report.workers.push(worker_report),
                Err(e) => Self::worker_aborted(domain, e, report),
            }
        }
    }

    fn worker_aborted(domain: Domain, e: JoinError, report: &mut RunReport) {
        error!("Worker for {} aborted: {}", domain, e);
        let error = MonitorError::WorkerStartup { domain: domain.name.clone(), reason: e.to_string() };
        report.failed_to_start.push(StartupFailure { domain, error });
    }

    async fn run_sequential(&self, mut workers: Vec<DomainProbeWorker>, config: RunConfig, report: &mut RunReport) {
        if !config.is_noop() {
            loop {
                let (remaining, cancelled) = self.sequential_round(workers, report).await;
                workers = remaining;
                if cancelled || workers.iter().all(DomainProbeWorker::is_done) {
                    break;
                }

                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(config.frequency) => {}
                }
            }
        }

        report.workers.extend(workers.into_iter().map(DomainProbeWorker::finish));
    }

    /// One cycle of every worker, in target order.
    ///
    /// Each cycle runs on its own task and is awaited before the next one
    /// starts. A worker whose cycle panics is dropped and reported, the
    /// same as in concurrent mode, and the round carries on.
    async fn sequential_round(
        &self,
        workers: Vec<DomainProbeWorker>,
        report: &mut RunReport,
    ) -> (Vec<DomainProbeWorker>, bool) {
        let mut survivors = Vec::with_capacity(workers.len());
        let mut pending = workers.into_iter();

        while let Some(mut worker) = pending.next() {
            if self.cancel.is_cancelled() {
                survivors.push(worker);
                survivors.extend(pending.by_ref());
                return (survivors, true);
            }

            let domain = worker.domain().clone();
            let cycle = tokio::spawn(async move {
                worker.run_cycle().await;
                worker
            });
            match cycle.await {
                Ok(worker) => survivors.push(worker),
                Err(e) => Self::worker_aborted(domain, e, report),
            }
        }

        (survivors, false)
    }
}
