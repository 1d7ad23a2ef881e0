//! Durable session store backed by SQLite
//!
//! Maps, context and tracked message IDs are kept as JSON columns next to an
//! absolute expiry timestamp. Expired rows read as not found.

mod schema;

pub use schema::{format_timestamp, parse_timestamp, SessionRow, SCHEMA};

use crate::error::SessionStoreError;
use crate::model::UserId;
use crate::runtime::SessionStore;
use crate::state_machine::Session;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub type DbResult<T> = Result<T, SessionStoreError>;

/// Thread-safe handle to the session database
#[derive(Clone)]
pub struct SqliteSessionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSessionStore {
    /// Open or create the database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Open an in-memory database
    pub fn open_in_memory() -> DbResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> DbResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load a session, ignoring expiry
    pub fn load(&self, user_id: UserId) -> DbResult<Option<Session>> {
        let row = self
            .conn()
            .query_row(
                "SELECT user_id, ttl_secs, expire_at, current_stage, context,
                        pending_inputs, pending_callbacks, stage_messages
                 FROM sessions WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(SessionRow {
                        user_id: row.get(0)?,
                        ttl_secs: row.get(1)?,
                        expire_at: row.get(2)?,
                        current_stage: row.get(3)?,
                        context: row.get(4)?,
                        pending_inputs: row.get(5)?,
                        pending_callbacks: row.get(6)?,
                        stage_messages: row.get(7)?,
                    })
                },
            )
            .optional()?;
        row.map(SessionRow::into_session).transpose()
    }

    /// Insert or replace a session
    pub fn upsert(&self, session: &Session) -> DbResult<()> {
        let row = SessionRow::from_session(session)?;
        let now = format_timestamp(Utc::now());
        self.conn().execute(
            "INSERT INTO sessions (user_id, ttl_secs, expire_at, current_stage, context,
                                   pending_inputs, pending_callbacks, stage_messages, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(user_id) DO UPDATE SET
                ttl_secs = excluded.ttl_secs,
                expire_at = excluded.expire_at,
                current_stage = excluded.current_stage,
                context = excluded.context,
                pending_inputs = excluded.pending_inputs,
                pending_callbacks = excluded.pending_callbacks,
                stage_messages = excluded.stage_messages,
                updated_at = excluded.updated_at",
            params![
                row.user_id,
                row.ttl_secs,
                row.expire_at,
                row.current_stage,
                row.context,
                row.pending_inputs,
                row.pending_callbacks,
                row.stage_messages,
                now,
            ],
        )?;
        Ok(())
    }

    /// Delete a session; returns whether a row existed
    pub fn delete(&self, user_id: UserId) -> DbResult<bool> {
        let deleted = self
            .conn()
            .execute("DELETE FROM sessions WHERE user_id = ?1", params![user_id])?;
        Ok(deleted > 0)
    }

    /// Delete every session expired at `now`
    pub fn purge_expired(&self, now: DateTime<Utc>) -> DbResult<usize> {
        let purged = self.conn().execute(
            "DELETE FROM sessions WHERE expire_at <= ?1",
            params![format_timestamp(now)],
        )?;
        if purged > 0 {
            tracing::debug!(purged, "Purged expired sessions");
        }
        Ok(purged)
    }

    pub fn count(&self) -> DbResult<usize> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn get(&self, user_id: UserId) -> Result<Session, SessionStoreError> {
        match self.load(user_id)? {
            Some(session) if !session.is_expired_at(Utc::now()) => Ok(session),
            _ => Err(SessionStoreError::NotFound(user_id)),
        }
    }

    async fn save(&self, session: &Session) -> Result<(), SessionStoreError> {
        self.upsert(session)
    }

    async fn expire(&self, user_id: UserId) -> Result<(), SessionStoreError> {
        self.delete(user_id)?;
        Ok(())
    }
}
