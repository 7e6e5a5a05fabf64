//! libSQL storage layer (embedded, local file).
//!
//! The [`Storage`] struct wraps a libSQL database holding JSON documents in
//! named buckets (apps, traces, frames, retraces) plus the per-app capture
//! gates. The pipeline only sees it through the [`Store`] trait.
//!
//! **Access rules:**
//! - pipeline and write commands: read-write via [`Storage::open`]
//! - inspection commands: read-only via [`Storage::open_readonly`]

mod migrations;

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracedeck_shared::{Result, TraceDeckError};

// ---------------------------------------------------------------------------
// Store interface
// ---------------------------------------------------------------------------

/// Document namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Apps,
    Traces,
    Frames,
    Retraces,
}

impl Bucket {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Apps => "apps",
            Self::Traces => "traces",
            Self::Frames => "frames",
            Self::Retraces => "retraces",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable bucketed key-value store with per-app capture gates.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch a document. Keys that are reserved but not yet written read as
    /// absent.
    async fn get(&self, bucket: Bucket, key: &str) -> Result<Option<String>>;

    /// Insert or replace a document.
    async fn set(&self, bucket: Bucket, key: &str, value: &str) -> Result<()>;

    /// Insert a document only if the key is unused. Returns whether it was
    /// inserted.
    async fn insert_new(&self, bucket: Bucket, key: &str, value: &str) -> Result<bool>;

    /// All keys in a bucket, sorted, without duplicates.
    async fn list_keys(&self, bucket: Bucket) -> Result<Vec<String>>;

    /// Claim `proposed`, or the first free `proposed-N` (N = 1, 2, ...).
    async fn reserve_unique_key(&self, bucket: Bucket, proposed: &str) -> Result<String>;

    /// Acquire the app's capture gate. Returns `false` if it is already held.
    async fn try_set_active(&self, app_id: &str) -> Result<bool>;

    /// Release the app's capture gate. Releasing a free gate is a no-op.
    async fn clear_active(&self, app_id: &str) -> Result<()>;

    async fn is_active(&self, app_id: &str) -> Result<bool>;
}

/// Load and deserialize a document.
pub async fn load<T: DeserializeOwned>(
    store: &dyn Store,
    bucket: Bucket,
    key: &str,
) -> Result<Option<T>> {
    match store.get(bucket, key).await? {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

/// Serialize and store a document.
pub async fn save<T: Serialize + Sync>(
    store: &dyn Store,
    bucket: Bucket,
    key: &str,
    value: &T,
) -> Result<()> {
    let json = serde_json::to_string(value)?;
    store.set(bucket, key, &json).await
}

// ---------------------------------------------------------------------------
// libSQL implementation
// ---------------------------------------------------------------------------

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
    /// Serializes multi-statement writes on the shared connection.
    write_lock: Mutex<()>,
}

fn storage_err(e: libsql::Error) -> TraceDeckError {
    TraceDeckError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TraceDeckError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
            write_lock: Mutex::new(()),
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(TraceDeckError::not_found(
                "database",
                path.display().to_string(),
            ));
        }
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
            write_lock: Mutex::new(()),
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        TraceDeckError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(TraceDeckError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    async fn key_exists(conn: &Connection, bucket: Bucket, key: &str) -> Result<bool> {
        let mut rows = conn
            .query(
                "SELECT 1 FROM kv WHERE bucket = ?1 AND key = ?2",
                params![bucket.as_str(), key],
            )
            .await
            .map_err(storage_err)?;
        Ok(rows.next().await.map_err(storage_err)?.is_some())
    }
}

#[async_trait]
impl Store for Storage {
    async fn get(&self, bucket: Bucket, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT value FROM kv WHERE bucket = ?1 AND key = ?2 AND value <> ''",
                params![bucket.as_str(), key],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(row.get::<String>(0).map_err(storage_err)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, bucket: Bucket, key: &str, value: &str) -> Result<()> {
        self.check_writable()?;
        let _guard = self.write_lock.lock().await;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO kv (bucket, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(bucket, key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at",
                params![bucket.as_str(), key, value, now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn insert_new(&self, bucket: Bucket, key: &str, value: &str) -> Result<bool> {
        self.check_writable()?;
        let _guard = self.write_lock.lock().await;
        let now = Utc::now().to_rfc3339();
        let inserted = self
            .conn
            .execute(
                "INSERT INTO kv (bucket, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(bucket, key) DO NOTHING",
                params![bucket.as_str(), key, value, now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(inserted == 1)
    }

    async fn list_keys(&self, bucket: Bucket) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT DISTINCT key FROM kv WHERE bucket = ?1 ORDER BY key",
                params![bucket.as_str()],
            )
            .await
            .map_err(storage_err)?;

        let mut keys = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            keys.push(row.get::<String>(0).map_err(storage_err)?);
        }
        Ok(keys)
    }

    async fn reserve_unique_key(&self, bucket: Bucket, proposed: &str) -> Result<String> {
        self.check_writable()?;
        let _guard = self.write_lock.lock().await;

        let mut candidate = proposed.to_string();
        let mut suffix = 0u32;
        loop {
            let tx = self.conn.transaction().await.map_err(storage_err)?;
            if !Self::key_exists(&tx, bucket, &candidate).await? {
                let now = Utc::now().to_rfc3339();
                tx.execute(
                    "INSERT INTO kv (bucket, key, value, updated_at) VALUES (?1, ?2, '', ?3)",
                    params![bucket.as_str(), candidate.as_str(), now.as_str()],
                )
                .await
                .map_err(storage_err)?;
                tx.commit().await.map_err(storage_err)?;
                tracing::debug!(%bucket, key = %candidate, "reserved key");
                return Ok(candidate);
            }
            tx.rollback().await.map_err(storage_err)?;
            suffix += 1;
            candidate = format!("{proposed}-{suffix}");
        }
    }

    async fn try_set_active(&self, app_id: &str) -> Result<bool> {
        self.check_writable()?;
        let _guard = self.write_lock.lock().await;
        let now = Utc::now().to_rfc3339();
        let acquired = self
            .conn
            .execute(
                "INSERT INTO active_gates (app_id, acquired_at) VALUES (?1, ?2)
                 ON CONFLICT(app_id) DO NOTHING",
                params![app_id, now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(acquired == 1)
    }

    async fn clear_active(&self, app_id: &str) -> Result<()> {
        self.check_writable()?;
        let _guard = self.write_lock.lock().await;
        self.conn
            .execute(
                "DELETE FROM active_gates WHERE app_id = ?1",
                params![app_id],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn is_active(&self, app_id: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM active_gates WHERE app_id = ?1",
                params![app_id],
            )
            .await
            .map_err(storage_err)?;
        Ok(rows.next().await.map_err(storage_err)?.is_some())
    }
}
