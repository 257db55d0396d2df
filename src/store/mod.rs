//! SQLite persistence for chat sessions and their messages.
//!
//! Messages reference their session with `ON DELETE CASCADE`, so deleting a
//! session removes its messages in the same statement.

pub mod models;

use chrono::Utc;
use log::info;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use models::{
    check_content, check_title, ChatMessage, ChatSession, NewMessage, SessionUpdate, MAX_PAGE_SIZE,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS chat_sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chat_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER NOT NULL REFERENCES chat_sessions(id) ON DELETE CASCADE,
    role TEXT NOT NULL CHECK(role IN ('user', 'assistant')),
    content TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_created ON chat_sessions(created_at);
CREATE INDEX IF NOT EXISTS idx_messages_session ON chat_messages(session_id, created_at);
"#;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    #[error("{0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone)]
pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    /// Open (creating if needed) the database at `url` and apply the schema.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.initialize_schema().await?;
        info!("Session store ready at {}", url);
        Ok(store)
    }

    /// Private in-memory database on a single pinned connection.
    #[cfg(test)]
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.initialize_schema().await?;
        Ok(store)
    }

    async fn initialize_schema(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ========== Sessions ==========

    pub async fn create_session(&self, title: &str) -> StoreResult<ChatSession> {
        check_title(title).map_err(StoreError::Validation)?;

        let session = sqlx::query_as::<_, ChatSession>(
            r#"
            INSERT INTO chat_sessions (title, created_at)
            VALUES (?, ?)
            RETURNING id, title, created_at
            "#,
        )
        .bind(title)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(session)
    }

    pub async fn list_sessions(&self, offset: i64, limit: i64) -> StoreResult<Vec<ChatSession>> {
        if offset < 0 {
            return Err(StoreError::Validation("offset must not be negative".to_string()));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&limit) {
            return Err(StoreError::Validation(format!(
                "limit must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }

        let sessions = sqlx::query_as::<_, ChatSession>(
            r#"
            SELECT id, title, created_at
            FROM chat_sessions
            ORDER BY created_at ASC, id ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(sessions)
    }

    pub async fn get_session(&self, id: i64) -> StoreResult<ChatSession> {
        sqlx::query_as::<_, ChatSession>(
            "SELECT id, title, created_at FROM chat_sessions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)
    }

    /// Apply only the fields present in `update`.
    pub async fn update_session(&self, id: i64, update: SessionUpdate) -> StoreResult<ChatSession> {
        if let Some(title) = &update.title {
            check_title(title).map_err(StoreError::Validation)?;
        }

        sqlx::query_as::<_, ChatSession>(
            r#"
            UPDATE chat_sessions SET title = COALESCE(?, title)
            WHERE id = ?
            RETURNING id, title, created_at
            "#,
        )
        .bind(update.title)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)
    }

    pub async fn delete_session(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM chat_sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // ========== Messages ==========

    pub async fn create_message(
        &self,
        session_id: i64,
        message: NewMessage,
    ) -> StoreResult<ChatMessage> {
        check_content(&message.content).map_err(StoreError::Validation)?;

        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM chat_sessions WHERE id = ?")
            .bind(session_id)
            .fetch_one(&mut *tx)
            .await?;
        if exists == 0 {
            return Err(StoreError::Validation(format!(
                "session {} does not exist",
                session_id
            )));
        }

        let created = sqlx::query_as::<_, ChatMessage>(
            r#"
            INSERT INTO chat_messages (session_id, role, content, created_at)
            VALUES (?, ?, ?, ?)
            RETURNING id, session_id, role, content, created_at
            "#,
        )
        .bind(session_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(created)
    }

    pub async fn list_messages(&self, session_id: i64) -> StoreResult<Vec<ChatMessage>> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM chat_sessions WHERE id = ?")
            .bind(session_id)
            .fetch_one(&mut *tx)
            .await?;
        if exists == 0 {
            return Err(StoreError::NotFound);
        }

        let messages = sqlx::query_as::<_, ChatMessage>(
            r#"
            SELECT id, session_id, role, content, created_at
            FROM chat_messages
            WHERE session_id = ?
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(messages)
    }
}
