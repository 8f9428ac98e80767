//! SQLite message and session store.
//!
//! Uses a single SQLite database file with two tables:
//! - `messages` — the per-session conversation log
//! - `sessions` — one row per visitor device

use async_trait::async_trait;
use chrono::Utc;
use sagebot_core::error::StoreError;
use sagebot_core::store::{MessageStore, Session, SessionStore, StoredMessage, StoredRole};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// A SQLite-backed store for messages and sessions.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    ///
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database (useful for tests).
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // Every connection to an in-memory database sees its own empty database.
        let max_connections = if path.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                iid          INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id   TEXT NOT NULL,
                role         TEXT NOT NULL,
                text         TEXT NOT NULL,
                partial      INTEGER NOT NULL DEFAULT 0,
                created_at   TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("messages table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, created_at DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("session index: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                session_id   TEXT PRIMARY KEY,
                user_id      TEXT,
                ip           TEXT NOT NULL,
                user_agent   TEXT NOT NULL DEFAULT '',
                device       TEXT NOT NULL,
                language     TEXT NOT NULL,
                referrer     TEXT,
                start_page   TEXT,
                pages        TEXT NOT NULL DEFAULT '[]',
                created_at   TEXT NOT NULL,
                updated_at   TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("sessions table: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn parse_time(s: &str) -> chrono::DateTime<Utc> {
        chrono::DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<StoredMessage, StoreError> {
        let get = |col: &str| -> Result<String, StoreError> {
            row.try_get(col)
                .map_err(|e| StoreError::QueryFailed(format!("{col} column: {e}")))
        };

        let role_str = get("role")?;
        let role = StoredRole::parse(&role_str)
            .ok_or_else(|| StoreError::QueryFailed(format!("unknown role '{role_str}'")))?;
        let partial: i64 = row.try_get("partial").unwrap_or(0);

        Ok(StoredMessage {
            session_id: get("session_id")?,
            role,
            text: get("text")?,
            partial: partial != 0,
            created_at: Self::parse_time(&get("created_at")?),
        })
    }

    fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Result<Session, StoreError> {
        let get = |col: &str| -> Result<String, StoreError> {
            row.try_get(col)
                .map_err(|e| StoreError::QueryFailed(format!("{col} column: {e}")))
        };
        let get_opt = |col: &str| -> Result<Option<String>, StoreError> {
            row.try_get(col)
                .map_err(|e| StoreError::QueryFailed(format!("{col} column: {e}")))
        };

        let pages: Vec<String> = serde_json::from_str(&get("pages")?).unwrap_or_default();

        Ok(Session {
            session_id: get("session_id")?,
            user_id: get_opt("user_id")?,
            ip: get("ip")?,
            user_agent: get("user_agent")?,
            device: get("device")?,
            language: get("language")?,
            referrer: get_opt("referrer")?,
            start_page: get_opt("start_page")?,
            pages,
            created_at: Self::parse_time(&get("created_at")?),
            updated_at: Self::parse_time(&get("updated_at")?),
        })
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn append(&self, message: StoredMessage) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO messages (session_id, role, text, partial, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&message.session_id)
        .bind(message.role.as_str())
        .bind(&message.text)
        .bind(message.partial as i64)
        .bind(message.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT failed: {e}")))?;

        debug!(session_id = %message.session_id, role = message.role.as_str(), "Stored message");
        Ok(())
    }

    async fn recent(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE session_id = ?1 ORDER BY created_at DESC, iid DESC LIMIT ?2",
        )
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("Recent messages: {e}")))?;

        rows.iter().map(Self::row_to_message).collect()
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn get(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE session_id = ?1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("GET session: {e}")))?;

        match row {
            Some(ref r) => Ok(Some(Self::row_to_session(r)?)),
            None => Ok(None),
        }
    }

    async fn create(&self, session: Session) -> Result<(), StoreError> {
        let pages = serde_json::to_string(&session.pages)
            .map_err(|e| StoreError::Storage(format!("Pages serialization: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO sessions (session_id, user_id, ip, user_agent, device, language,
                                  referrer, start_page, pages, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(session_id) DO NOTHING
            "#,
        )
        .bind(&session.session_id)
        .bind(&session.user_id)
        .bind(&session.ip)
        .bind(&session.user_agent)
        .bind(&session.device)
        .bind(&session.language)
        .bind(&session.referrer)
        .bind(&session.start_page)
        .bind(&pages)
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT session failed: {e}")))?;

        Ok(())
    }
}
