//! Serialized access to the shared aggregate store.
//!
//! Probes run in parallel, but the store session underneath is a single
//! resource that must not see two operations at once. [`StoreGate`] owns
//! the store behind a one-permit semaphore: every read and write, from
//! every worker, holds the permit for its whole duration. The permit is a
//! guard, so it is returned on every exit path, failures included, before
//! the caller sees the error.

use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::trace;

use crate::database::{Domain, DomainStats, LatencyAggregate, StatsStore};
use crate::error::StoreFailure;
use crate::stats::{self, Sample};

pub struct StoreGate {
    store: Arc<dyn StatsStore>,
    permit: Semaphore,
}

impl StoreGate {
    pub fn new(store: Arc<dyn StatsStore>) -> Self {
        Self { store, permit: Semaphore::new(1) }
    }

    async fn enter(&self) -> Result<SemaphorePermit<'_>, StoreFailure> {
        self.permit
            .acquire()
            .await
            .map_err(|_| StoreFailure::from(anyhow!("store gate closed")))
    }

    pub async fn top_domains(&self, n: usize) -> Result<Vec<Domain>, StoreFailure> {
        let _permit = self.enter().await?;
        self.store.top_domains(n).await
    }

    pub async fn domain_stats(&self) -> Result<Vec<DomainStats>, StoreFailure> {
        let _permit = self.enter().await?;
        self.store.domain_stats().await
    }

    /// Read the domain's aggregate, fold `sample` into it and write it back,
    /// all inside one critical section.
    ///
    /// No other store operation can run between the read and the write, so
    /// an update can never be computed from a stale row.
    pub async fn record_sample(&self, sample: &Sample) -> Result<LatencyAggregate, StoreFailure> {
        let _permit = self.enter().await?;
        trace!(domain_id = sample.domain_id, "entered store critical section");

        let previous = self.store.load_aggregate(sample.domain_id).await?;
        let next = stats::update(previous.as_ref(), sample);
        self.store.upsert_aggregate(&next).await?;

        trace!(domain_id = sample.domain_id, "leaving store critical section");
        Ok(next)
    }
}
