//! Persistent aggregate store.
//!
//! `StatsStore` is the seam the probe engine talks to; `LibsqlStatsStore`
//! is the libsql implementation used by the binary.

pub mod migrations;
pub mod models;
pub mod repository;

pub use models::{Domain, DomainStats, LatencyAggregate};
pub use repository::{LibsqlStatsStore, StatsStore};

use anyhow::{Context, Result};
use tracing::info;

use crate::pool::{LibsqlPool, single_session_pool};

/// Open the database named by `database` and bring its schema up to date.
///
/// `libsql://`, `http://` and `https://` identifiers open a remote database
/// authenticated with `auth_token`; anything else is a local path or
/// `:memory:`.
pub async fn connect(database: &str, auth_token: Option<&str>) -> Result<LibsqlPool> {
    let db = if is_remote(database) {
        info!("Connecting to remote database {}", database);
        libsql::Builder::new_remote(database.to_string(), auth_token.unwrap_or_default().to_string())
            .build()
            .await
            .with_context(|| format!("opening remote database {database}"))?
    } else {
        info!("Opening local database {}", database);
        libsql::Builder::new_local(database)
            .build()
            .await
            .with_context(|| format!("opening database {database}"))?
    };

    let pool = single_session_pool(db).context("building connection pool")?;
    let conn = pool.get().await.context("connecting to database")?;
    initialize_database(&conn).await?;
    drop(conn);

    Ok(pool)
}

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}

fn is_remote(database: &str) -> bool {
    ["libsql://", "http://", "https://"].iter().any(|scheme| database.starts_with(scheme))
}
