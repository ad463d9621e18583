//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::StoreError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "subscriptions",
        sql: r#"
            CREATE TABLE IF NOT EXISTS subscriptions (
                channel_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                key TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE (channel_id, kind, key)
            );
            CREATE INDEX IF NOT EXISTS idx_subscriptions_channel ON subscriptions(channel_id);
            CREATE INDEX IF NOT EXISTS idx_subscriptions_source ON subscriptions(kind, key);
        "#,
    },
    Migration {
        version: 2,
        name: "dedup_snapshots",
        sql: r#"
            CREATE TABLE IF NOT EXISTS seen_items (
                kind TEXT NOT NULL,
                key TEXT NOT NULL,
                track_id INTEGER NOT NULL,
                seen_at TEXT NOT NULL,
                UNIQUE (kind, key, track_id)
            );
            CREATE INDEX IF NOT EXISTS idx_seen_items_at ON seen_items(seen_at);

            CREATE TABLE IF NOT EXISTS deliveries (
                channel_id INTEGER NOT NULL,
                track_id INTEGER NOT NULL,
                delivered_at TEXT NOT NULL,
                UNIQUE (channel_id, track_id)
            );
            CREATE INDEX IF NOT EXISTS idx_deliveries_at ON deliveries(delivered_at);
        "#,
    },
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| StoreError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                StoreError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    Ok(())
}

async fn get_current_version(conn: &Connection) -> Result<i64, StoreError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| StoreError::Migration(format!("Failed to read migration version: {e}")))?;

    match rows.next().await {
        Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0)),
        Ok(None) => Ok(0),
        Err(e) => Err(StoreError::Migration(format!(
            "Failed to read migration version: {e}"
        ))),
    }
}

async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| StoreError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
