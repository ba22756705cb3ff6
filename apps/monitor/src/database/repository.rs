use anyhow::Context;
use async_trait::async_trait;
use libsql::params;

use super::models::{Domain, DomainStats, LatencyAggregate, i64_to_timestamp, timestamp_to_i64};
use crate::error::StoreFailure;
use crate::pool::{LibsqlManager, LibsqlPool};

/// Durable store of targets and per-domain aggregates.
///
/// Implementations are not required to tolerate concurrent use: callers
/// issue every operation through [`crate::gate::StoreGate`], which admits
/// one operation at a time.
#[async_trait]
pub trait StatsStore: Send + Sync {
    /// The `n` best-ranked domains, ties broken by ascending id.
    async fn top_domains(&self, n: usize) -> Result<Vec<Domain>, StoreFailure>;

    /// Current aggregate for a domain, `None` if nothing was recorded yet.
    async fn load_aggregate(&self, domain_id: i64) -> Result<Option<LatencyAggregate>, StoreFailure>;

    /// Create the aggregate row on first write, update it in place after.
    /// `first_observed_at` of an existing row is never rewritten.
    async fn upsert_aggregate(&self, aggregate: &LatencyAggregate) -> Result<(), StoreFailure>;

    /// Every domain with its aggregate, in rank order.
    async fn domain_stats(&self) -> Result<Vec<DomainStats>, StoreFailure>;
}

/// LibSQL store implementation
pub struct LibsqlStatsStore {
    pool: LibsqlPool,
}

impl LibsqlStatsStore {
    pub fn new(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    async fn get_conn(&self) -> anyhow::Result<deadpool::managed::Object<LibsqlManager>> {
        self.pool.get().await.context("acquiring database connection")
    }
}

fn aggregate_from_row(row: &libsql::Row, offset: i32) -> libsql::Result<LatencyAggregate> {
    Ok(LatencyAggregate {
        domain_id: row.get(offset)?,
        mean_ms: row.get(offset + 1)?,
        stdev_ms: row.get(offset + 2)?,
        sample_count: row.get::<i64>(offset + 3)?.max(0) as u64,
        first_observed_at: i64_to_timestamp(row.get(offset + 4)?),
        last_observed_at: i64_to_timestamp(row.get(offset + 5)?),
    })
}

#[async_trait]
impl StatsStore for LibsqlStatsStore {
    async fn top_domains(&self, n: usize) -> Result<Vec<Domain>, StoreFailure> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query("SELECT id, name FROM domain ORDER BY rank ASC, id ASC LIMIT ?", params![n as i64])
            .await
            .context("querying top domains")?;

        let mut domains = Vec::new();
        while let Some(row) = rows.next().await.context("reading top domains")? {
            domains.push(Domain {
                id: row.get(0).context("domain id")?,
                name: row.get(1).context("domain name")?,
            });
        }

        Ok(domains)
    }

    async fn load_aggregate(&self, domain_id: i64) -> Result<Option<LatencyAggregate>, StoreFailure> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT domain_id, mean_ms, stdev_ms, sample_count, first_observed_at, last_observed_at FROM aggregate WHERE domain_id = ?",
                params![domain_id],
            )
            .await
            .with_context(|| format!("querying aggregate for domain {domain_id}"))?;

        // domain_id is the primary key, so at most one row comes back
        match rows.next().await.context("reading aggregate")? {
            Some(row) => Ok(Some(aggregate_from_row(&row, 0).context("decoding aggregate")?)),
            None => Ok(None),
        }
    }

    async fn upsert_aggregate(&self, aggregate: &LatencyAggregate) -> Result<(), StoreFailure> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO aggregate (domain_id, mean_ms, stdev_ms, sample_count, first_observed_at, last_observed_at) VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(domain_id) DO UPDATE SET
                mean_ms = excluded.mean_ms,
                stdev_ms = excluded.stdev_ms,
                sample_count = excluded.sample_count,
                last_observed_at = excluded.last_observed_at",
            params![
                aggregate.domain_id,
                aggregate.mean_ms,
                aggregate.stdev_ms,
                aggregate.sample_count as i64,
                timestamp_to_i64(aggregate.first_observed_at),
                timestamp_to_i64(aggregate.last_observed_at)
            ],
        )
        .await
        .with_context(|| format!("upserting aggregate for domain {}", aggregate.domain_id))?;

        Ok(())
    }

    async fn domain_stats(&self) -> Result<Vec<DomainStats>, StoreFailure> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT d.id, d.name, d.rank, a.domain_id, a.mean_ms, a.stdev_ms, a.sample_count, a.first_observed_at, a.last_observed_at
                 FROM domain d LEFT JOIN aggregate a ON a.domain_id = d.id
                 ORDER BY d.rank ASC, d.id ASC",
                (),
            )
            .await
            .context("querying domain stats")?;

        let mut stats = Vec::new();
        while let Some(row) = rows.next().await.context("reading domain stats")? {
            let has_aggregate = row.get::<Option<i64>>(3).context("aggregate key")?.is_some();
            stats.push(DomainStats {
                domain: Domain {
                    id: row.get(0).context("domain id")?,
                    name: row.get(1).context("domain name")?,
                },
                rank: row.get(2).context("domain rank")?,
                aggregate: if has_aggregate {
                    Some(aggregate_from_row(&row, 3).context("decoding aggregate")?)
                } else {
                    None
                },
            });
        }

        Ok(stats)
    }
}
