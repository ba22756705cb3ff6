//! Test doubles for the resolver and the aggregate store.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rand::Rng;

use crate::database::{Domain, DomainStats, LatencyAggregate, StatsStore};
use crate::error::{ProbeFailure, StoreFailure};
use crate::resolver::Resolver;

pub fn t(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

/// In-memory store that behaves like a session that must not be shared:
/// it records how many operations overlapped and whether any write was
/// computed from a stale read.
pub struct MemoryStore {
    domains: Vec<Domain>,
    aggregates: Mutex<HashMap<i64, LatencyAggregate>>,
    max_delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    stale_writes: AtomicUsize,
    upserts: AtomicUsize,
    failing_loads: AtomicUsize,
    failing_upserts: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryStore {
    /// Domains are ranked in the order given.
    pub fn new(domains: Vec<Domain>) -> Self {
        Self {
            domains,
            aggregates: Mutex::new(HashMap::new()),
            max_delay: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            stale_writes: AtomicUsize::new(0),
            upserts: AtomicUsize::new(0),
            failing_loads: AtomicUsize::new(0),
            failing_upserts: AtomicUsize::new(0),
        }
    }

    /// Sleep a random duration up to `max` inside every read and write.
    pub fn with_random_delay(mut self, max: Duration) -> Self {
        self.max_delay = Some(max);
        self
    }

    pub fn fail_next_loads(&self, n: usize) {
        self.failing_loads.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_upserts(&self, n: usize) {
        self.failing_upserts.store(n, Ordering::SeqCst);
    }

    pub fn aggregate(&self, domain_id: i64) -> Option<LatencyAggregate> {
        self.aggregates.lock().unwrap().get(&domain_id).cloned()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn stale_writes(&self) -> usize {
        self.stale_writes.load(Ordering::SeqCst)
    }

    pub fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    async fn begin(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);

        if let Some(max) = self.max_delay {
            let delay = rand::thread_rng().gen_range(Duration::ZERO..=max);
            tokio::time::sleep(delay).await;
        }
        guard
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
    }
}

#[async_trait]
impl StatsStore for MemoryStore {
    async fn top_domains(&self, n: usize) -> Result<Vec<Domain>, StoreFailure> {
        let _op = self.begin().await;
        Ok(self.domains.iter().take(n).cloned().collect())
    }

    async fn load_aggregate(&self, domain_id: i64) -> Result<Option<LatencyAggregate>, StoreFailure> {
        let _op = self.begin().await;
        if Self::take_failure(&self.failing_loads) {
            return Err(anyhow!("injected read failure").into());
        }
        Ok(self.aggregate(domain_id))
    }

    async fn upsert_aggregate(&self, aggregate: &LatencyAggregate) -> Result<(), StoreFailure> {
        let _op = self.begin().await;
        if Self::take_failure(&self.failing_upserts) {
            return Err(anyhow!("injected write failure").into());
        }

        let mut aggregates = self.aggregates.lock().unwrap();
        let expected = aggregates.get(&aggregate.domain_id).map_or(1, |a| a.sample_count + 1);
        if aggregate.sample_count != expected {
            self.stale_writes.fetch_add(1, Ordering::SeqCst);
        }
        let first_observed_at = aggregates
            .get(&aggregate.domain_id)
            .map_or(aggregate.first_observed_at, |a| a.first_observed_at);
        aggregates.insert(aggregate.domain_id, LatencyAggregate { first_observed_at, ..aggregate.clone() });
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn domain_stats(&self) -> Result<Vec<DomainStats>, StoreFailure> {
        let _op = self.begin().await;
        Ok(self
            .domains
            .iter()
            .enumerate()
            .map(|(rank, domain)| DomainStats {
                domain: domain.clone(),
                rank: rank as i64 + 1,
                aggregate: self.aggregate(domain.id),
            })
            .collect())
    }
}

/// Resolver that replays a fixed latency script per domain.
///
/// Negative entries are probe failures. Once a script runs out every probe
/// for that domain answers in `fallback_ms`.
pub struct ScriptedResolver {
    scripts: Mutex<HashMap<String, VecDeque<f64>>>,
    queried: Mutex<Vec<String>>,
    fallback_ms: f64,
    network_wait: Duration,
    crashing: Option<String>,
}

impl ScriptedResolver {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            queried: Mutex::new(Vec::new()),
            fallback_ms: 1.0,
            network_wait: Duration::ZERO,
            crashing: None,
        }
    }

    pub fn script(self, domain: &str, latencies: &[f64]) -> Self {
        self.scripts.lock().unwrap().insert(domain.to_string(), latencies.iter().copied().collect());
        self
    }

    /// Time each probe spends "on the network" before answering.
    pub fn network_wait(mut self, wait: Duration) -> Self {
        self.network_wait = wait;
        self
    }

    /// Every probe of `domain` panics.
    pub fn crash_on(mut self, domain: &str) -> Self {
        self.crashing = Some(domain.to_string());
        self
    }

    pub fn queried(&self) -> Vec<String> {
        self.queried.lock().unwrap().clone()
    }
}

#[async_trait]
impl Resolver for ScriptedResolver {
    async fn probe(&self, query_name: &str) -> Result<f64, ProbeFailure> {
        self.queried.lock().unwrap().push(query_name.to_string());
        if !self.network_wait.is_zero() {
            tokio::time::sleep(self.network_wait).await;
        }

        let domain = query_name.split_once('.').map_or(query_name, |(_, rest)| rest);
        if self.crashing.as_deref() == Some(domain) {
            panic!("resolver crashed on {domain}");
        }
        let next = self.scripts.lock().unwrap().get_mut(domain).and_then(VecDeque::pop_front);
        match next.unwrap_or(self.fallback_ms) {
            latency if latency < 0.0 => Err(ProbeFailure::NoAnswer(query_name.to_string())),
            latency => Ok(latency),
        }
    }
}
