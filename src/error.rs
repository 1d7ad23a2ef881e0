//! Engine error taxonomy

use crate::model::ResourceRef;
use crate::runtime::TransportError;
use crate::model::UserId;
use std::fmt;
use thiserror::Error;

/// Namespace an unresolved or duplicated reference belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Command,
    Stage,
    CallbackHandler,
    Action,
    CallbackToken,
    Session,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Stage => "stage",
            Self::CallbackHandler => "callback handler",
            Self::Action => "action",
            Self::CallbackToken => "callback token",
            Self::Session => "session",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from session persistence backends
#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("Session not found for user {0}")]
    NotFound(UserId),
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Session backend error: {0}")]
    Backend(String),
}

impl SessionStoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Errors surfaced by registration and event dispatch
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{kind} '{reference}' not found")]
    NotFound {
        kind: EntityKind,
        reference: ResourceRef,
    },
    #[error("{kind} '{reference}' already exists")]
    AlreadyExists {
        kind: EntityKind,
        reference: ResourceRef,
    },
    #[error("User {0} is not authorized")]
    Unauthorized(UserId),
    #[error("Input not recognized in stage '{stage}'")]
    UnrecognizedInput { stage: ResourceRef },
    #[error("Initializer of stage '{stage}' failed: {message}")]
    StageInitializer { stage: ResourceRef, message: String },
    #[error("Transport failure: {0}")]
    TransportFailure(#[from] TransportError),
    #[error("Persistence failure: {0}")]
    PersistenceFailure(#[from] SessionStoreError),
}

impl EngineError {
    pub fn not_found(kind: EntityKind, reference: impl Into<ResourceRef>) -> Self {
        Self::NotFound {
            kind,
            reference: reference.into(),
        }
    }

    pub fn already_exists(kind: EntityKind, reference: impl Into<ResourceRef>) -> Self {
        Self::AlreadyExists {
            kind,
            reference: reference.into(),
        }
    }

    /// Whether this error ends the pipeline before any session mutation
    pub fn aborts_before_mutation(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::Unauthorized(_)
                | Self::UnrecognizedInput { .. }
                | Self::StageInitializer { .. }
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
