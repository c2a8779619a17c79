use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::traits::{CredentialStore, PersistenceError, ReminderLogStore};

impl From<sqlx::Error> for PersistenceError {
    fn from(e: sqlx::Error) -> Self {
        PersistenceError::Backend(e.to_string())
    }
}

/// Set restrictive file permissions (0600) on the database and WAL files.
fn set_db_file_permissions(db_path: &str) {
    use std::os::unix::fs::PermissionsExt;
    let mode = std::fs::Permissions::from_mode(0o600);
    if let Err(e) = std::fs::set_permissions(db_path, mode.clone()) {
        tracing::warn!("Failed to set permissions on {}: {}", db_path, e);
    }
    for suffix in &["-wal", "-shm"] {
        let path = format!("{}{}", db_path, suffix);
        if std::path::Path::new(&path).exists() {
            if let Err(e) = std::fs::set_permissions(&path, mode.clone()) {
                tracing::warn!("Failed to set permissions on {}: {}", path, e);
            }
        }
    }
}

/// SQLite-backed persistence: credential records and the reminder dedup log.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new(db_path: &str) -> anyhow::Result<Self> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;

        // Credential blobs are secrets: owner-only read/write.
        set_db_file_permissions(db_path);

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS auth_state (
                session_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value BLOB NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (session_id, key)
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS reminder_log (
                client_id TEXT NOT NULL,
                date_key TEXT NOT NULL,
                days_before INTEGER NOT NULL,
                slot INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (client_id, date_key, days_before, slot)
            )",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl CredentialStore for SqliteStore {
    async fn write(
        &self,
        session_id: &str,
        key: &str,
        value: &[u8],
    ) -> Result<(), PersistenceError> {
        sqlx::query(
            "INSERT INTO auth_state (session_id, key, value, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(session_id, key) DO UPDATE SET
               value = excluded.value,
               updated_at = excluded.updated_at",
        )
        .bind(session_id)
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn read(
        &self,
        session_id: &str,
        key: &str,
    ) -> Result<Option<Vec<u8>>, PersistenceError> {
        let row = sqlx::query("SELECT value FROM auth_state WHERE session_id = ? AND key = ?")
            .bind(session_id)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<Vec<u8>, _>("value")))
    }

    async fn remove(&self, session_id: &str, key: &str) -> Result<(), PersistenceError> {
        sqlx::query("DELETE FROM auth_state WHERE session_id = ? AND key = ?")
            .bind(session_id)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn wipe(&self, session_id: &str) -> Result<(), PersistenceError> {
        sqlx::query("DELETE FROM auth_state WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<String>, PersistenceError> {
        let rows =
            sqlx::query("SELECT DISTINCT session_id FROM auth_state ORDER BY session_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|r| r.get::<String, _>("session_id"))
            .collect())
    }
}

#[async_trait]
impl ReminderLogStore for SqliteStore {
    async fn record_reminder(
        &self,
        client_id: &str,
        date_key: &str,
        days_before: i64,
        slot: u32,
    ) -> Result<bool, PersistenceError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO reminder_log
               (client_id, date_key, days_before, slot, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(client_id)
        .bind(date_key)
        .bind(days_before)
        .bind(slot)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn reminder_sent(
        &self,
        client_id: &str,
        date_key: &str,
        days_before: i64,
        slot: u32,
    ) -> Result<bool, PersistenceError> {
        let row = sqlx::query(
            "SELECT 1 FROM reminder_log
             WHERE client_id = ? AND date_key = ? AND days_before = ? AND slot = ?",
        )
        .bind(client_id)
        .bind(date_key)
        .bind(days_before)
        .bind(slot)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }
}
