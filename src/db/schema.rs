//! Session table schema and row mapping

use crate::error::SessionStoreError;
use crate::model::{MessageId, ResourceRef, UserId};
use crate::state_machine::{PendingCallback, Session, UserContext};
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashMap;

/// SQL schema for initialization
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS sessions (
    user_id INTEGER PRIMARY KEY,
    ttl_secs INTEGER NOT NULL,
    expire_at TEXT NOT NULL,
    current_stage TEXT NOT NULL DEFAULT '',
    context TEXT NOT NULL,
    pending_inputs TEXT NOT NULL DEFAULT '{}',
    pending_callbacks TEXT NOT NULL DEFAULT '{}',
    stage_messages TEXT NOT NULL DEFAULT '[]',
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_expire_at ON sessions(expire_at);
";

/// Timestamps are stored in a fixed-width UTC form so they sort as text
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, SessionStoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| SessionStoreError::Backend(format!("invalid timestamp '{value}': {e}")))
}

/// A `sessions` row with JSON columns still encoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRow {
    pub user_id: UserId,
    pub ttl_secs: i64,
    pub expire_at: String,
    pub current_stage: String,
    pub context: String,
    pub pending_inputs: String,
    pub pending_callbacks: String,
    pub stage_messages: String,
}

impl SessionRow {
    pub fn from_session(session: &Session) -> Result<Self, SessionStoreError> {
        Ok(Self {
            user_id: session.user_id,
            ttl_secs: session.ttl_secs,
            expire_at: format_timestamp(session.expire_at),
            current_stage: session.current_stage.to_string(),
            context: serde_json::to_string(&session.context)?,
            pending_inputs: serde_json::to_string(&session.pending_inputs)?,
            pending_callbacks: serde_json::to_string(&session.pending_callbacks)?,
            stage_messages: serde_json::to_string(&session.stage_messages)?,
        })
    }

    pub fn into_session(self) -> Result<Session, SessionStoreError> {
        let context: UserContext = serde_json::from_str(&self.context)?;
        let pending_inputs: HashMap<String, ResourceRef> =
            serde_json::from_str(&self.pending_inputs)?;
        let pending_callbacks: HashMap<String, PendingCallback> =
            serde_json::from_str(&self.pending_callbacks)?;
        let stage_messages: Vec<MessageId> = serde_json::from_str(&self.stage_messages)?;
        Ok(Session {
            user_id: self.user_id,
            ttl_secs: self.ttl_secs,
            expire_at: parse_timestamp(&self.expire_at)?,
            current_stage: ResourceRef::from(self.current_stage),
            context,
            pending_inputs,
            pending_callbacks,
            stage_messages,
        })
    }
}
