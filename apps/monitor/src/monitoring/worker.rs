use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::types::{CycleOutcome, RunConfig, WorkerReport, WorkerState};
use crate::database::Domain;
use crate::error::MonitorError;
use crate::gate::StoreGate;
use crate::resolver::{self, Resolver};
use crate::stats::Sample;

/// Probes one domain on a fixed cadence and folds each measurement into
/// that domain's aggregate.
///
/// A worker is the only writer of its domain's row. Cycles run strictly one
/// after another, so the row sees updates in cycle order.
pub struct DomainProbeWorker {
    domain: Domain,
    resolver: Arc<dyn Resolver>,
    store: Arc<StoreGate>,
    config: RunConfig,
    state: WorkerState,
    report: WorkerReport,
}

impl DomainProbeWorker {
    /// Fails with `WorkerStartup` when the domain cannot be probed at all.
    pub fn new(
        domain: Domain,
        resolver: Arc<dyn Resolver>,
        store: Arc<StoreGate>,
        config: RunConfig,
    ) -> Result<Self, MonitorError> {
        resolver::validate_target(&domain.name).map_err(|e| MonitorError::WorkerStartup {
            domain: domain.name.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            report: WorkerReport::new(domain.clone()),
            domain,
            resolver,
            store,
            config,
            state: WorkerState::Idle,
        })
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn report(&self) -> &WorkerReport {
        &self.report
    }

    /// No further cycle is due.
    pub fn is_done(&self) -> bool {
        self.state == WorkerState::Stopped
            || self.config.is_noop()
            || self.config.is_exhausted(self.report.cycles_completed)
    }

    fn transition(&mut self, next: WorkerState) {
        trace!(domain = %self.domain.name, from = %self.state, to = %next, "worker state");
        self.state = next;
    }

    /// Run one probe cycle without the trailing sleep.
    ///
    /// Every cycle ends in `Aggregating` and counts towards the limit, a
    /// failed probe included; only successful probes reach the store.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.transition(WorkerState::Probing);
        let query = resolver::query_name(&self.domain.name);
        let observed_at = Utc::now();
        let probed = self.resolver.probe(&query).await;

        self.transition(WorkerState::Aggregating);
        let outcome = match probed {
            Ok(latency_ms) => match Sample::new(self.domain.id, latency_ms, observed_at) {
                Some(sample) => self.aggregate(&sample).await,
                None => {
                    warn!(domain = %self.domain.name, latency_ms, "probe reported an invalid latency");
                    CycleOutcome::ProbeFailed
                }
            },
            Err(e) => {
                warn!(domain = %self.domain.name, query = %query, "probe failed: {}", e);
                CycleOutcome::ProbeFailed
            }
        };

        self.report.record(&outcome);
        outcome
    }

    async fn aggregate(&self, sample: &Sample) -> CycleOutcome {
        match self.store.record_sample(sample).await {
            Ok(aggregate) => {
                debug!(
                    domain = %self.domain.name,
                    latency_ms = sample.latency_ms,
                    mean_ms = aggregate.mean_ms,
                    stdev_ms = aggregate.stdev_ms,
                    samples = aggregate.sample_count,
                    "aggregate updated"
                );
                CycleOutcome::Recorded(aggregate)
            }
            Err(e) => {
                warn!(domain = %self.domain.name, "failed to update aggregate: {}", e);
                CycleOutcome::StoreFailed
            }
        }
    }

    /// Cycle until the limit is reached or `cancel` fires.
    ///
    /// Cancellation is honoured before a probe starts and during the sleep.
    /// A probe that already started is carried through its aggregate update
    /// so the last measurement is never lost half-written.
    pub async fn run(mut self, cancel: CancellationToken) -> WorkerReport {
        if self.config.is_noop() {
            debug!(domain = %self.domain.name, "frequency below one second, nothing to do");
            return self.finish();
        }

        info!(domain = %self.domain.name, "worker started");
        loop {
            if cancel.is_cancelled() {
                break;
            }

            self.run_cycle().await;
            if self.is_done() {
                break;
            }

            self.transition(WorkerState::Sleeping);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.frequency) => {}
            }
        }

        self.finish()
    }

    /// Stop the worker and hand back its tally.
    pub fn finish(mut self) -> WorkerReport {
        self.transition(WorkerState::Stopped);
        info!(
            domain = %self.domain.name,
            cycles = self.report.cycles_completed,
            samples = self.report.samples_recorded,
            "worker stopped"
        );
        self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryStore, ScriptedResolver};
    use std::time::Duration;

    fn worker(
        resolver: ScriptedResolver,
        store: Arc<MemoryStore>,
        config: RunConfig,
    ) -> DomainProbeWorker {
        let gate = Arc::new(StoreGate::new(store));
        DomainProbeWorker::new(Domain::new(1, "a.com"), Arc::new(resolver), gate, config).unwrap()
    }

    #[tokio::test]
    async fn cycle_probes_a_cache_busted_name() {
        let resolver = Arc::new(ScriptedResolver::new().script("a.com", &[12.0, 14.0]));
        let store = Arc::new(MemoryStore::new(vec![Domain::new(1, "a.com")]));
        let gate = Arc::new(StoreGate::new(store.clone()));
        let mut w =
            DomainProbeWorker::new(Domain::new(1, "a.com"), resolver.clone(), gate, RunConfig::new(1, 2)).unwrap();

        w.run_cycle().await;
        w.run_cycle().await;

        let queried = resolver.queried();
        assert_eq!(queried.len(), 2);
        assert!(queried.iter().all(|q| q.ends_with(".a.com")));
        assert_ne!(queried[0], queried[1]);
        assert_eq!(w.state(), WorkerState::Aggregating);
        assert_eq!(store.aggregate(1).unwrap().mean_ms, 13.0);
    }

    #[tokio::test]
    async fn failed_probe_does_not_touch_aggregate() {
        let store = Arc::new(MemoryStore::new(vec![Domain::new(1, "a.com")]));
        let mut w = worker(ScriptedResolver::new().script("a.com", &[30.0, -1.0]), store.clone(), RunConfig::new(1, 2));

        assert!(matches!(w.run_cycle().await, CycleOutcome::Recorded(_)));
        let before = store.aggregate(1).unwrap();

        assert_eq!(w.run_cycle().await, CycleOutcome::ProbeFailed);
        assert_eq!(store.aggregate(1).unwrap(), before);
        assert_eq!(store.upserts(), 1);
        assert_eq!(w.report().cycles_completed, 2);
        assert_eq!(w.report().probe_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn store_failure_is_not_fatal() {
        let store = Arc::new(MemoryStore::new(vec![Domain::new(1, "a.com")]));
        store.fail_next_upserts(1);
        let w = worker(ScriptedResolver::new().script("a.com", &[5.0, 7.0, 9.0]), store.clone(), RunConfig::new(1, 3));

        let report = tokio::time::timeout(Duration::from_secs(10), w.run(CancellationToken::new())).await.unwrap();

        assert_eq!(report.cycles_completed, 3);
        assert_eq!(report.store_failures, 1);
        assert_eq!(report.samples_recorded, 2);
        assert_eq!(store.aggregate(1).unwrap().mean_ms, 8.0);
    }

    #[tokio::test]
    async fn noop_frequency_runs_no_cycles() {
        let store = Arc::new(MemoryStore::new(vec![Domain::new(1, "a.com")]));
        let resolver = ScriptedResolver::new();
        let w = worker(resolver, store.clone(), RunConfig::new(0, 5));

        let report = w.run(CancellationToken::new()).await;
        assert_eq!(report.cycles_completed, 0);
        assert!(store.aggregate(1).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_sleep_stops_promptly() {
        let store = Arc::new(MemoryStore::new(vec![Domain::new(1, "a.com")]));
        let w = worker(ScriptedResolver::new(), store.clone(), RunConfig::new(3600, 0));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(w.run(cancel.clone()));
        tokio::time::sleep(Duration::from_secs(10)).await;
        cancel.cancel();

        let report = handle.await.unwrap();
        assert_eq!(report.cycles_completed, 1);
        assert_eq!(store.aggregate(1).unwrap().sample_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_mid_probe_keeps_the_measurement() {
        let store = Arc::new(MemoryStore::new(vec![Domain::new(1, "a.com")]));
        let resolver = ScriptedResolver::new().script("a.com", &[40.0]).network_wait(Duration::from_secs(2));
        let w = worker(resolver, store.clone(), RunConfig::new(60, 0));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(w.run(cancel.clone()));
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();

        let report = handle.await.unwrap();
        assert_eq!(report.cycles_completed, 1);
        assert_eq!(store.aggregate(1).unwrap().mean_ms, 40.0);
    }

    #[test]
    fn invalid_domain_cannot_start() {
        let store = Arc::new(MemoryStore::new(Vec::new()));
        let gate = Arc::new(StoreGate::new(store));
        let result = DomainProbeWorker::new(
            Domain::new(9, ""),
            Arc::new(ScriptedResolver::new()),
            gate,
            RunConfig::default(),
        );
        assert!(matches!(result, Err(MonitorError::WorkerStartup { .. })));
    }
}
