//! Collaborator contracts consumed by the dispatcher
//!
//! Storage, transport, authorization and telemetry sit behind these traits
//! so the pipeline can run against mocks in tests.

use crate::error::{EngineError, SessionStoreError};
use crate::model::{CallbackAnswer, MessageId, OutboundMessage, ResourceRef, UserId};
use crate::state_machine::Session;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Which transport operation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Send,
    Delete,
    AnswerCallback,
    /// The channel to the platform is gone
    Closed,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Send => "send",
            Self::Delete => "delete",
            Self::AnswerCallback => "answer callback",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind} failed: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn send(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Send, message)
    }

    pub fn delete(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Delete, message)
    }

    pub fn closed() -> Self {
        Self::new(TransportErrorKind::Closed, "transport closed")
    }
}

/// Per-user session persistence
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session; an absent or expired one is `SessionStoreError::NotFound`
    async fn get(&self, user_id: UserId) -> Result<Session, SessionStoreError>;

    /// Persist a session, replacing any previous one for the same user
    async fn save(&self, session: &Session) -> Result<(), SessionStoreError>;

    /// Drop a user's session
    async fn expire(&self, user_id: UserId) -> Result<(), SessionStoreError>;
}

/// Outbound side of the chat platform
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver a message, returning the platform's message ID
    async fn send(
        &self,
        user_id: UserId,
        message: &OutboundMessage,
    ) -> Result<MessageId, TransportError>;

    async fn delete(&self, user_id: UserId, message_id: MessageId) -> Result<(), TransportError>;

    async fn answer_callback(
        &self,
        query_id: &str,
        answer: &CallbackAnswer,
    ) -> Result<(), TransportError>;
}

/// Yes/no access decision for a user
pub trait Authorizer: Send + Sync {
    /// `Err(EngineError::Unauthorized)` denies the event
    fn authorize(&self, user_id: UserId) -> Result<(), EngineError>;
}

/// Fire-and-forget counters and histograms.
///
/// Implementations must not fail or block; the pipeline ignores them.
pub trait Telemetry: Send + Sync {
    fn unauthenticated_request(&self, user_id: UserId);
    fn user_message_received(&self);
    fn bot_message_sent(&self);
    fn callback_processed(&self, handler: &ResourceRef);
    fn command_executed(&self, command: &ResourceRef);
    fn stage_reached(&self, stage: &ResourceRef);
    fn stage_action_processed(&self, action: &ResourceRef);
    fn request_duration(&self, elapsed: Duration);
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: SessionStore + ?Sized> SessionStore for Arc<T> {
    async fn get(&self, user_id: UserId) -> Result<Session, SessionStoreError> {
        (**self).get(user_id).await
    }

    async fn save(&self, session: &Session) -> Result<(), SessionStoreError> {
        (**self).save(session).await
    }

    async fn expire(&self, user_id: UserId) -> Result<(), SessionStoreError> {
        (**self).expire(user_id).await
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(
        &self,
        user_id: UserId,
        message: &OutboundMessage,
    ) -> Result<MessageId, TransportError> {
        (**self).send(user_id, message).await
    }

    async fn delete(&self, user_id: UserId, message_id: MessageId) -> Result<(), TransportError> {
        (**self).delete(user_id, message_id).await
    }

    async fn answer_callback(
        &self,
        query_id: &str,
        answer: &CallbackAnswer,
    ) -> Result<(), TransportError> {
        (**self).answer_callback(query_id, answer).await
    }
}

impl<T: Authorizer + ?Sized> Authorizer for Arc<T> {
    fn authorize(&self, user_id: UserId) -> Result<(), EngineError> {
        (**self).authorize(user_id)
    }
}

impl<T: Telemetry + ?Sized> Telemetry for Arc<T> {
    fn unauthenticated_request(&self, user_id: UserId) {
        (**self).unauthenticated_request(user_id);
    }

    fn user_message_received(&self) {
        (**self).user_message_received();
    }

    fn bot_message_sent(&self) {
        (**self).bot_message_sent();
    }

    fn callback_processed(&self, handler: &ResourceRef) {
        (**self).callback_processed(handler);
    }

    fn command_executed(&self, command: &ResourceRef) {
        (**self).command_executed(command);
    }

    fn stage_reached(&self, stage: &ResourceRef) {
        (**self).stage_reached(stage);
    }

    fn stage_action_processed(&self, action: &ResourceRef) {
        (**self).stage_action_processed(action);
    }

    fn request_duration(&self, elapsed: Duration) {
        (**self).request_duration(elapsed);
    }
}
