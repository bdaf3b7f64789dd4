use chrono::{DateTime, TimeZone, Utc};
use pulse_core::{CacheConfig, CacheEntry, EntryKind, RawItem, StorageError};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Time-to-live per entry kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    pub posts: Duration,
    pub comments: Duration,
}

impl CacheTtls {
    pub fn for_kind(&self, kind: &EntryKind) -> Duration {
        match kind {
            EntryKind::Posts => self.posts,
            EntryKind::Comments { .. } => self.comments,
        }
    }
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            posts: EntryKind::POSTS_TTL,
            comments: EntryKind::COMMENTS_TTL,
        }
    }
}

impl From<&CacheConfig> for CacheTtls {
    fn from(config: &CacheConfig) -> Self {
        Self {
            posts: config.posts_ttl(),
            comments: config.comments_ttl(),
        }
    }
}

/// Durable store of fetched item collections, one live row per
/// (resource, kind) key.
///
/// Expiry is lazy: `get` treats an entry past its ttl as absent, and rows are
/// only deleted by [`CacheStore::purge_expired`] or [`CacheStore::purge_older_than`].
/// Each read and write is a single SQLite statement, so a concurrent `get`
/// sees either the old or the new entry for a key.
#[derive(Debug, Clone)]
pub struct CacheStore {
    pool: SqlitePool,
    ttls: CacheTtls,
}

impl CacheStore {
    pub async fn open(path: &Path, ttls: CacheTtls) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::ConnectionFailed {
                    reason: format!("cannot create {}: {}", parent.display(), e),
                })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed {
                reason: e.to_string(),
            })?;

        info!("Cache store opened at {}", path.display());
        Self::from_pool(pool, ttls).await
    }

    pub async fn from_pool(pool: SqlitePool, ttls: CacheTtls) -> Result<Self, StorageError> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::MigrationFailed {
                migration: e.to_string(),
            })?;

        Ok(Self { pool, ttls })
    }

    pub fn ttls(&self) -> CacheTtls {
        self.ttls
    }

    /// Live entry for the key, or `None` if missing or expired.
    pub async fn get(
        &self,
        resource: &str,
        kind: &EntryKind,
    ) -> Result<Option<CacheEntry>, StorageError> {
        self.get_at(resource, kind, Utc::now()).await
    }

    pub async fn get_at(
        &self,
        resource: &str,
        kind: &EntryKind,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>, StorageError> {
        let row = sqlx::query(
            "SELECT fetched_at, ttl_ms, requested_limit, items FROM cache_entries \
             WHERE resource = ? AND kind = ? AND scope = ?",
        )
        .bind(resource)
        .bind(kind.label())
        .bind(kind.scope())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            debug!("Cache miss for {} {}", resource, kind);
            return Ok(None);
        };

        let entry = decode_entry(resource, kind, &row)?;
        if !entry.is_live_at(now) {
            debug!(
                "Cache entry for {} {} expired at {}",
                resource,
                kind,
                entry.expires_at()
            );
            return Ok(None);
        }

        debug!(
            "Cache hit for {} {} ({} items)",
            resource,
            kind,
            entry.items.len()
        );
        Ok(Some(entry))
    }

    /// Stores `items` under the key, replacing whatever was there.
    pub async fn put(
        &self,
        resource: &str,
        kind: &EntryKind,
        items: Vec<RawItem>,
        requested_limit: usize,
    ) -> Result<CacheEntry, StorageError> {
        self.put_at(resource, kind, items, requested_limit, Utc::now())
            .await
    }

    pub async fn put_at(
        &self,
        resource: &str,
        kind: &EntryKind,
        items: Vec<RawItem>,
        requested_limit: usize,
        fetched_at: DateTime<Utc>,
    ) -> Result<CacheEntry, StorageError> {
        let entry = CacheEntry {
            resource: resource.to_string(),
            kind: kind.clone(),
            fetched_at,
            ttl: self.ttls.for_kind(kind),
            requested_limit,
            items,
        };

        let payload =
            serde_json::to_string(&entry.items).map_err(|e| StorageError::CorruptEntry {
                key: entry_key(resource, kind),
                reason: e.to_string(),
            })?;

        sqlx::query(
            "INSERT INTO cache_entries \
             (resource, kind, scope, fetched_at, ttl_ms, requested_limit, items) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (resource, kind, scope) DO UPDATE SET \
             fetched_at = excluded.fetched_at, ttl_ms = excluded.ttl_ms, \
             requested_limit = excluded.requested_limit, items = excluded.items",
        )
        .bind(resource)
        .bind(kind.label())
        .bind(kind.scope())
        .bind(fetched_at.timestamp_millis())
        .bind(entry.ttl.as_millis() as i64)
        .bind(requested_limit as i64)
        .bind(payload)
        .execute(&self.pool)
        .await?;

        debug!(
            "Cached {} items for {} {}",
            entry.items.len(),
            resource,
            kind
        );
        Ok(entry)
    }

    /// Deletes every expired row, returning how many were removed.
    pub async fn purge_expired(&self) -> Result<u64, StorageError> {
        self.purge_expired_at(Utc::now()).await
    }

    pub async fn purge_expired_at(&self, now: DateTime<Utc>) -> Result<u64, StorageError> {
        let removed = sqlx::query("DELETE FROM cache_entries WHERE fetched_at + ttl_ms <= ?")
            .bind(now.timestamp_millis())
            .execute(&self.pool)
            .await?
            .rows_affected();

        if removed > 0 {
            info!("Purged {} expired cache entries", removed);
        }
        Ok(removed)
    }

    /// Deletes rows fetched before `cutoff`, live or not.
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError> {
        let removed = sqlx::query("DELETE FROM cache_entries WHERE fetched_at < ?")
            .bind(cutoff.timestamp_millis())
            .execute(&self.pool)
            .await?
            .rows_affected();

        if removed > 0 {
            info!("Removed {} cache entries fetched before {}", removed, cutoff);
        }
        Ok(removed)
    }

    /// Number of stored rows, expired ones included.
    pub async fn count(&self) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cache_entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn entry_key(resource: &str, kind: &EntryKind) -> String {
    format!("{}/{}", resource, kind)
}

fn decode_entry(
    resource: &str,
    kind: &EntryKind,
    row: &SqliteRow,
) -> Result<CacheEntry, StorageError> {
    let corrupt = |reason: String| StorageError::CorruptEntry {
        key: entry_key(resource, kind),
        reason,
    };

    let fetched_ms: i64 = row.try_get("fetched_at")?;
    let ttl_ms: i64 = row.try_get("ttl_ms")?;
    let requested_limit: i64 = row.try_get("requested_limit")?;
    let payload: String = row.try_get("items")?;

    let fetched_at = Utc
        .timestamp_millis_opt(fetched_ms)
        .single()
        .ok_or_else(|| corrupt(format!("invalid fetched_at {}", fetched_ms)))?;
    let items: Vec<RawItem> = serde_json::from_str(&payload).map_err(|e| corrupt(e.to_string()))?;

    Ok(CacheEntry {
        resource: resource.to_string(),
        kind: kind.clone(),
        fetched_at,
        ttl: Duration::from_millis(ttl_ms.max(0) as u64),
        requested_limit: requested_limit.max(0) as usize,
        items,
    })
}
