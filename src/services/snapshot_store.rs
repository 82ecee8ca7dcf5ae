use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, sqlite::SqlitePool};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::models::MediaItem;

/// Independent namespaces for persisted catalog snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotKind {
    Local,
    Remote,
    Unified,
}

impl SnapshotKind {
    pub const ALL: [SnapshotKind; 3] = [
        SnapshotKind::Local,
        SnapshotKind::Remote,
        SnapshotKind::Unified,
    ];

    pub fn namespace(&self) -> &'static str {
        match self {
            SnapshotKind::Local => "catalog:local",
            SnapshotKind::Remote => "catalog:remote",
            SnapshotKind::Unified => "catalog:unified",
        }
    }
}

impl std::fmt::Display for SnapshotKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.namespace())
    }
}

/// Freshness window per namespace
#[derive(Debug, Clone)]
pub struct SnapshotFreshness {
    pub local: Duration,
    pub remote: Duration,
    pub unified: Duration,
}

impl Default for SnapshotFreshness {
    fn default() -> Self {
        Self {
            local: Duration::from_secs(30 * 60),
            remote: Duration::from_secs(10 * 60),
            unified: Duration::from_secs(10 * 60),
        }
    }
}

impl SnapshotFreshness {
    pub fn window(&self, kind: SnapshotKind) -> Duration {
        match kind {
            SnapshotKind::Local => self.local,
            SnapshotKind::Remote => self.remote,
            SnapshotKind::Unified => self.unified,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub items: Vec<MediaItem>,
    pub timestamp: DateTime<Utc>,
}

impl CatalogSnapshot {
    pub fn new(items: Vec<MediaItem>) -> Self {
        Self {
            items,
            timestamp: Utc::now(),
        }
    }

    pub fn age(&self) -> Duration {
        (Utc::now() - self.timestamp).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_fresh(&self, window: Duration) -> bool {
        self.age() < window
    }
}

/// Best-effort persistence of catalog snapshots; never the source of truth.
#[async_trait]
pub trait SnapshotStore: Send + Sync + std::fmt::Debug {
    async fn load(&self, kind: SnapshotKind) -> Result<Option<CatalogSnapshot>>;

    async fn save(&self, kind: SnapshotKind, snapshot: &CatalogSnapshot) -> Result<()>;

    /// Remove one namespace, or all of them
    async fn clear(&self, kind: Option<SnapshotKind>) -> Result<()>;

    async fn save_items(&self, kind: SnapshotKind, items: &[MediaItem]) -> Result<()> {
        self.save(kind, &CatalogSnapshot::new(items.to_vec())).await
    }

    /// Snapshot younger than `window`, if any
    async fn load_fresh(
        &self,
        kind: SnapshotKind,
        window: Duration,
    ) -> Result<Option<CatalogSnapshot>> {
        Ok(self.load(kind).await?.and_then(|snapshot| {
            if snapshot.is_fresh(window) {
                Some(snapshot)
            } else {
                debug!(
                    "Snapshot {} is stale ({:?} old, window {:?})",
                    kind,
                    snapshot.age(),
                    window
                );
                None
            }
        }))
    }
}

#[derive(Debug)]
pub struct SqliteSnapshotStore {
    db: SqlitePool,
}

impl SqliteSnapshotStore {
    pub fn default_path() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir().context("Failed to get cache directory")?;
        Ok(cache_dir.join("rv-catalog").join("snapshots.db"))
    }

    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create snapshot directory")?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", path.display());
        let db = SqlitePool::connect(&db_url)
            .await
            .context("Failed to connect to snapshot database")?;

        Self::initialize_schema(&db).await?;
        debug!("Snapshot store opened at {}", path.display());
        Ok(Self { db })
    }

    async fn initialize_schema(db: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS catalog_snapshots (
                namespace TEXT PRIMARY KEY,
                items TEXT NOT NULL,
                saved_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(db)
        .await
        .context("Failed to create catalog_snapshots table")?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn load(&self, kind: SnapshotKind) -> Result<Option<CatalogSnapshot>> {
        let row = sqlx::query("SELECT items, saved_at FROM catalog_snapshots WHERE namespace = ?")
            .bind(kind.namespace())
            .fetch_optional(&self.db)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let items: String = row.try_get("items")?;
        let saved_at: i64 = row.try_get("saved_at")?;
        let timestamp = Utc
            .timestamp_millis_opt(saved_at)
            .single()
            .context("Invalid snapshot timestamp")?;

        Ok(Some(CatalogSnapshot {
            items: serde_json::from_str(&items).context("Failed to decode snapshot items")?,
            timestamp,
        }))
    }

    async fn save(&self, kind: SnapshotKind, snapshot: &CatalogSnapshot) -> Result<()> {
        let json = serde_json::to_string(&snapshot.items)?;

        sqlx::query(
            r#"
            INSERT INTO catalog_snapshots (namespace, items, saved_at)
            VALUES (?, ?, ?)
            ON CONFLICT(namespace) DO UPDATE SET
                items = excluded.items,
                saved_at = excluded.saved_at
            "#,
        )
        .bind(kind.namespace())
        .bind(json)
        .bind(snapshot.timestamp.timestamp_millis())
        .execute(&self.db)
        .await?;

        trace!("Saved {} items to {}", snapshot.items.len(), kind);
        Ok(())
    }

    async fn clear(&self, kind: Option<SnapshotKind>) -> Result<()> {
        match kind {
            Some(kind) => {
                sqlx::query("DELETE FROM catalog_snapshots WHERE namespace = ?")
                    .bind(kind.namespace())
                    .execute(&self.db)
                    .await?;
            }
            None => {
                sqlx::query("DELETE FROM catalog_snapshots")
                    .execute(&self.db)
                    .await?;
            }
        }
        Ok(())
    }
}

/// Process-lifetime store for tests and for running without a cache directory
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    entries: RwLock<HashMap<SnapshotKind, CatalogSnapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self, kind: SnapshotKind) -> Result<Option<CatalogSnapshot>> {
        Ok(self.entries.read().await.get(&kind).cloned())
    }

    async fn save(&self, kind: SnapshotKind, snapshot: &CatalogSnapshot) -> Result<()> {
        self.entries.write().await.insert(kind, snapshot.clone());
        Ok(())
    }

    async fn clear(&self, kind: Option<SnapshotKind>) -> Result<()> {
        let mut entries = self.entries.write().await;
        match kind {
            Some(kind) => {
                entries.remove(&kind);
            }
            None => entries.clear(),
        }
        Ok(())
    }
}
