//! libSQL backend — async `Store` trait implementation.
//!
//! Supports local file and in-memory databases. A single connection is
//! reused for all operations; `libsql::Connection` is `Send + Sync` and safe
//! for concurrent async use.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;

use crate::error::StoreError;
use crate::model::{ChannelId, Source, TrackId};
use crate::store::migrations;
use crate::store::traits::{DeliveryRow, SeenRow, Store, SubscriptionRow};

/// libSQL store backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Open(format!("Failed to create database directory: {e}")))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        info!(path = %path.display(), "Database opened");
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to create in-memory database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

/// Parse an RFC 3339 timestamp; `None` signals "treat as seen at load time".
fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[async_trait]
impl Store for LibSqlBackend {
    async fn load_subscriptions(&self) -> Result<Vec<SubscriptionRow>, StoreError> {
        let mut rows = self
            .conn()
            .query("SELECT channel_id, kind, key FROM subscriptions", ())
            .await
            .map_err(|e| StoreError::Query(format!("load_subscriptions: {e}")))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("load_subscriptions: {e}")))?
        {
            let channel_id: i64 = row.get(0).map_err(row_err("load_subscriptions"))?;
            let kind: String = row.get(1).map_err(row_err("load_subscriptions"))?;
            let key: String = row.get(2).map_err(row_err("load_subscriptions"))?;
            match Source::from_parts(&kind, &key) {
                Some(source) => out.push(SubscriptionRow {
                    channel_id: ChannelId(channel_id as u64),
                    source,
                }),
                None => {
                    tracing::warn!(kind, key, "Skipping subscription row with unknown source kind");
                }
            }
        }
        Ok(out)
    }

    async fn insert_subscription(
        &self,
        channel: ChannelId,
        source: &Source,
    ) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO subscriptions (channel_id, kind, key) VALUES (?1, ?2, ?3)",
                params![channel.0 as i64, source.kind_str(), source.key_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("insert_subscription: {e}")))?;
        Ok(())
    }

    async fn delete_subscription(
        &self,
        channel: ChannelId,
        source: &Source,
    ) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "DELETE FROM subscriptions WHERE channel_id = ?1 AND kind = ?2 AND key = ?3",
                params![channel.0 as i64, source.kind_str(), source.key_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("delete_subscription: {e}")))?;
        Ok(())
    }

    async fn delete_channel(&self, channel: ChannelId) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "DELETE FROM subscriptions WHERE channel_id = ?1",
                params![channel.0 as i64],
            )
            .await
            .map_err(|e| StoreError::Query(format!("delete_channel: {e}")))?;
        self.conn()
            .execute(
                "DELETE FROM deliveries WHERE channel_id = ?1",
                params![channel.0 as i64],
            )
            .await
            .map_err(|e| StoreError::Query(format!("delete_channel: {e}")))?;
        Ok(())
    }

    async fn load_seen(&self) -> Result<Vec<SeenRow>, StoreError> {
        let mut rows = self
            .conn()
            .query("SELECT kind, key, track_id, seen_at FROM seen_items", ())
            .await
            .map_err(|e| StoreError::Query(format!("load_seen: {e}")))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("load_seen: {e}")))?
        {
            let kind: String = row.get(0).map_err(row_err("load_seen"))?;
            let key: String = row.get(1).map_err(row_err("load_seen"))?;
            let track_id: i64 = row.get(2).map_err(row_err("load_seen"))?;
            let seen_at: String = row.get(3).map_err(row_err("load_seen"))?;
            if let Some(source) = Source::from_parts(&kind, &key) {
                out.push(SeenRow {
                    source,
                    track_id: TrackId(track_id as u64),
                    seen_at: parse_datetime(&seen_at),
                });
            }
        }
        Ok(out)
    }

    async fn insert_seen(
        &self,
        source: &Source,
        track: TrackId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO seen_items (kind, key, track_id, seen_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    source.kind_str(),
                    source.key_string(),
                    track.0 as i64,
                    at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("insert_seen: {e}")))?;
        Ok(())
    }

    async fn load_deliveries(&self) -> Result<Vec<DeliveryRow>, StoreError> {
        let mut rows = self
            .conn()
            .query("SELECT channel_id, track_id, delivered_at FROM deliveries", ())
            .await
            .map_err(|e| StoreError::Query(format!("load_deliveries: {e}")))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("load_deliveries: {e}")))?
        {
            let channel_id: i64 = row.get(0).map_err(row_err("load_deliveries"))?;
            let track_id: i64 = row.get(1).map_err(row_err("load_deliveries"))?;
            let delivered_at: String = row.get(2).map_err(row_err("load_deliveries"))?;
            out.push(DeliveryRow {
                channel_id: ChannelId(channel_id as u64),
                track_id: TrackId(track_id as u64),
                delivered_at: parse_datetime(&delivered_at),
            });
        }
        Ok(out)
    }

    async fn insert_delivery(
        &self,
        channel: ChannelId,
        track: TrackId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO deliveries (channel_id, track_id, delivered_at) VALUES (?1, ?2, ?3)",
                params![channel.0 as i64, track.0 as i64, at.to_rfc3339()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("insert_delivery: {e}")))?;
        Ok(())
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let cutoff = cutoff.to_rfc3339();
        let seen = self
            .conn()
            .execute("DELETE FROM seen_items WHERE seen_at < ?1", params![cutoff.clone()])
            .await
            .map_err(|e| StoreError::Query(format!("prune_before: {e}")))?;
        let delivered = self
            .conn()
            .execute("DELETE FROM deliveries WHERE delivered_at < ?1", params![cutoff])
            .await
            .map_err(|e| StoreError::Query(format!("prune_before: {e}")))?;
        Ok(seen + delivered)
    }
}

fn row_err(op: &'static str) -> impl Fn(libsql::Error) -> StoreError {
    move |e| StoreError::Query(format!("{op} row parse: {e}"))
}
