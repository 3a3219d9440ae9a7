use anyhow::Result;
use libsql::{Connection, params};

/// Schema version - increment when making schema changes.
const SCHEMA_VERSION: i32 = 1;

/// Run database migrations. Single source of truth for the schema.
pub async fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current_version = get_current_version(conn).await?;

    if current_version >= SCHEMA_VERSION {
        tracing::debug!("database schema is up to date (version {current_version})");
        return Ok(());
    }

    tracing::info!("running migrations from version {current_version} to {SCHEMA_VERSION}");

    if current_version < 1 {
        run_migration_v1(conn).await?;
        record_migration(conn, 1, "initial schema: sites and certificate approvals").await?;
    }

    tracing::info!("database migrations completed (now at version {SCHEMA_VERSION})");
    Ok(())
}

async fn get_current_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query("SELECT MAX(version) FROM schema_migrations", ())
        .await?;

    if let Some(row) = rows.next().await? {
        let version: Option<i32> = row.get(0)?;
        Ok(version.unwrap_or(0))
    } else {
        Ok(0)
    }
}

async fn record_migration(conn: &Connection, version: i32, description: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        params![version, chrono::Utc::now().timestamp(), description],
    )
    .await?;
    Ok(())
}

async fn run_migration_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sites (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            url TEXT NOT NULL,
            interval_seconds INTEGER NOT NULL,
            mode TEXT NOT NULL,
            content TEXT,
            last_verdict TEXT,
            last_reason TEXT,
            last_checked_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS certificate_approvals (
            site_id TEXT PRIMARY KEY,
            fingerprint TEXT NOT NULL,
            approved_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    Ok(())
}
