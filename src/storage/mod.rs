use anyhow::{Context as _, Result};
use chrono::Utc;
use serde_json::Value;
use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use std::{path::Path, str::FromStr};

/// Logical namespace prefix for persisted global settings.
/// Keys on disk follow the `<namespace>-<version>-<name>` pattern,
/// e.g. `flagscope-v1-apiHost`.
pub const STORAGE_NAMESPACE: &str = "flagscope";
pub const STORAGE_VERSION: &str = "v1";

/// Default timeout for individual SQLite queries.
/// Prevents hung queries from blocking the daemon indefinitely.
const QUERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Execute a future with the standard query timeout.
async fn with_timeout<T>(fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(QUERY_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!(
            "database query timed out after {}s",
            QUERY_TIMEOUT.as_secs()
        )),
    }
}

/// Build the on-disk key for a persisted global property.
pub fn namespaced(name: &str) -> String {
    format!("{STORAGE_NAMESPACE}-{STORAGE_VERSION}-{name}")
}

/// Durable backing store for persisted state entries.
///
/// In-memory state is authoritative for the session; this is write-through
/// only. A failed write is logged by the caller and never rolls anything
/// back.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db_path = data_dir.join("flagscope.db");
        let opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .create_if_missing(true);

        let pool = SqlitePool::connect_with(opts).await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        sqlx::migrate!("src/storage/migrations")
            .run(pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(())
    }

    // ── Global state ─────────────────────────────────────────────────────────

    pub async fn load_global(&self, key: &str) -> Result<Option<Value>> {
        let pool = self.pool.clone();
        let key = key.to_string();
        with_timeout(async move {
            let row: Option<(String,)> =
                sqlx::query_as("SELECT value FROM global_state WHERE key = ?")
                    .bind(&key)
                    .fetch_optional(&pool)
                    .await?;
            match row {
                Some((raw,)) => Ok(Some(
                    serde_json::from_str(&raw).context("corrupt persisted global value")?,
                )),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn save_global(&self, key: &str, value: &Value) -> Result<()> {
        let pool = self.pool.clone();
        let key = key.to_string();
        let raw = value.to_string();
        with_timeout(async move {
            sqlx::query(
                "INSERT INTO global_state (key, value, updated_at) VALUES (?, ?, ?)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                               updated_at = excluded.updated_at",
            )
            .bind(&key)
            .bind(&raw)
            .bind(Utc::now().to_rfc3339())
            .execute(&pool)
            .await?;
            Ok(())
        })
        .await
    }

    pub async fn delete_global(&self, key: &str) -> Result<()> {
        let pool = self.pool.clone();
        let key = key.to_string();
        with_timeout(async move {
            sqlx::query("DELETE FROM global_state WHERE key = ?")
                .bind(&key)
                .execute(&pool)
                .await?;
            Ok(())
        })
        .await
    }

    // ── Tab state ────────────────────────────────────────────────────────────

    pub async fn load_tab(&self, tab_id: &str, key: &str) -> Result<Option<Value>> {
        let pool = self.pool.clone();
        let tab_id = tab_id.to_string();
        let key = key.to_string();
        with_timeout(async move {
            let row: Option<(String,)> =
                sqlx::query_as("SELECT value FROM tab_state WHERE tab_id = ? AND key = ?")
                    .bind(&tab_id)
                    .bind(&key)
                    .fetch_optional(&pool)
                    .await?;
            match row {
                Some((raw,)) => Ok(Some(
                    serde_json::from_str(&raw).context("corrupt persisted tab value")?,
                )),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn save_tab(&self, tab_id: &str, key: &str, value: &Value) -> Result<()> {
        let pool = self.pool.clone();
        let tab_id = tab_id.to_string();
        let key = key.to_string();
        let raw = value.to_string();
        with_timeout(async move {
            sqlx::query(
                "INSERT INTO tab_state (tab_id, key, value, updated_at) VALUES (?, ?, ?, ?)
                 ON CONFLICT(tab_id, key) DO UPDATE SET value = excluded.value,
                                                       updated_at = excluded.updated_at",
            )
            .bind(&tab_id)
            .bind(&key)
            .bind(&raw)
            .bind(Utc::now().to_rfc3339())
            .execute(&pool)
            .await?;
            Ok(())
        })
        .await
    }

    /// Drop all persisted entries for a closed tab.
    pub async fn clear_tab(&self, tab_id: &str) -> Result<()> {
        let pool = self.pool.clone();
        let tab_id = tab_id.to_string();
        with_timeout(async move {
            sqlx::query("DELETE FROM tab_state WHERE tab_id = ?")
                .bind(&tab_id)
                .execute(&pool)
                .await?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn global_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let storage = Storage::new(dir.path()).await.unwrap();
            storage
                .save_global(&namespaced("apiHost"), &json!("https://api.example.com"))
                .await
                .unwrap();
        }
        let storage = Storage::new(dir.path()).await.unwrap();
        let loaded = storage.load_global(&namespaced("apiHost")).await.unwrap();
        assert_eq!(loaded, Some(json!("https://api.example.com")));
    }

    #[tokio::test]
    async fn tab_state_is_cleared_per_tab() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path()).await.unwrap();
        storage.save_tab("t1", "features", &json!({"a": 1})).await.unwrap();
        storage.save_tab("t2", "features", &json!({"b": 2})).await.unwrap();
        storage.clear_tab("t1").await.unwrap();
        assert_eq!(storage.load_tab("t1", "features").await.unwrap(), None);
        assert_eq!(
            storage.load_tab("t2", "features").await.unwrap(),
            Some(json!({"b": 2}))
        );
    }

    #[tokio::test]
    async fn missing_key_is_none_not_error() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path()).await.unwrap();
        assert_eq!(storage.load_global("nope").await.unwrap(), None);
    }
}
