use anyhow::{Context, Result};
use libsql::Connection;

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 1;

/// Targets seeded into a fresh database, as `(id, rank, name)`.
const DEFAULT_DOMAINS: [(i64, i64, &str); 10] = [
    (1, 1, "google.com"),
    (2, 2, "facebook.com"),
    (3, 3, "youtube.com"),
    (4, 4, "yahoo.com"),
    (5, 5, "live.com"),
    (6, 6, "wikipedia.org"),
    (7, 7, "baidu.com"),
    (8, 8, "blogger.com"),
    (9, 9, "msn.com"),
    (10, 10, "qq.com"),
];

/// Bring the schema up to `SCHEMA_VERSION`.
pub async fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await
    .context("creating schema_migrations")?;

    let current_version = get_current_version(conn).await?;

    if current_version >= SCHEMA_VERSION {
        tracing::debug!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    tracing::info!("Running migrations from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        run_migration_v1(conn).await?;
        record_migration(conn, 1, "Domain targets and latency aggregates").await?;
    }

    Ok(())
}

async fn get_current_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn.query("SELECT MAX(version) FROM schema_migrations", ()).await?;

    if let Some(row) = rows.next().await? {
        let version: Option<i32> = row.get(0)?;
        Ok(version.unwrap_or(0))
    } else {
        Ok(0)
    }
}

async fn record_migration(conn: &Connection, version: i32, description: &str) -> Result<()> {
    let now = chrono::Utc::now().timestamp();

    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        libsql::params![version, now, description],
    )
    .await?;

    tracing::info!("Applied migration v{}: {}", version, description);
    Ok(())
}

/// Migration v1: `domain` and `aggregate` tables plus the default targets.
async fn run_migration_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS domain (
            id INTEGER PRIMARY KEY,
            rank INTEGER NOT NULL,
            name TEXT NOT NULL
        )",
        (),
    )
    .await
    .context("creating domain table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS aggregate (
            domain_id INTEGER PRIMARY KEY REFERENCES domain(id),
            mean_ms REAL NOT NULL,
            stdev_ms REAL NOT NULL,
            sample_count INTEGER NOT NULL,
            first_observed_at INTEGER NOT NULL,
            last_observed_at INTEGER NOT NULL
        )",
        (),
    )
    .await
    .context("creating aggregate table")?;

    conn.execute("CREATE INDEX IF NOT EXISTS idx_domain_rank ON domain(rank, id)", ())
        .await
        .context("creating domain rank index")?;

    // operator edits to the target list survive re-seeding
    for (id, rank, name) in DEFAULT_DOMAINS {
        conn.execute(
            "INSERT OR IGNORE INTO domain (id, rank, name) VALUES (?, ?, ?)",
            libsql::params![id, rank, name],
        )
        .await
        .with_context(|| format!("seeding domain {name}"))?;
    }

    Ok(())
}
