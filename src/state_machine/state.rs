//! Per-user session state

use super::event::SenderProfile;
use crate::error::{EngineError, EntityKind};
use crate::model::{CallbackRetention, MessageId, ResourceRef, UserId};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Default session lifetime in seconds
pub const DEFAULT_SESSION_TTL_SECS: i64 = 86_400;

/// Longest session lifetime the configuration accepts (about ten years)
pub const MAX_SESSION_TTL_SECS: i64 = 10 * 365 * 86_400;

/// What actions learn about the user they are serving
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Free-form values an embedding application keeps per user
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub misc: HashMap<String, Value>,
}

impl UserContext {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            ..Self::default()
        }
    }

    /// Fill fields the context does not know yet from a sender profile
    pub fn absorb_profile(&mut self, profile: &SenderProfile) {
        fill(&mut self.lang, profile.language_code.as_ref());
        fill(&mut self.name, profile.first_name.as_ref());
        fill(&mut self.last_name, profile.last_name.as_ref());
        fill(&mut self.username, profile.username.as_ref());
    }
}

fn fill(slot: &mut Option<String>, value: Option<&String>) {
    if slot.is_none() {
        *slot = value.cloned();
    }
}

/// Binding of a minted callback token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCallback {
    pub handler: ResourceRef,
    pub retention: CallbackRetention,
}

/// Position of a user in the dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogState<'a> {
    NoStage,
    InStage(&'a ResourceRef),
}

/// Durable per-user state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: UserId,
    pub ttl_secs: i64,
    pub expire_at: DateTime<Utc>,
    #[serde(default)]
    pub current_stage: ResourceRef,
    pub context: UserContext,
    /// Reply-keyboard text -> action bound in the current stage
    #[serde(default)]
    pub pending_inputs: HashMap<String, ResourceRef>,
    /// Callback token -> handler binding
    #[serde(default)]
    pub pending_callbacks: HashMap<String, PendingCallback>,
    /// Messages shown while in the current stage, oldest first
    #[serde(default)]
    pub stage_messages: Vec<MessageId>,
}

impl Session {
    pub fn new(user_id: UserId) -> Self {
        Self::with_ttl(user_id, DEFAULT_SESSION_TTL_SECS)
    }

    pub fn with_ttl(user_id: UserId, ttl_secs: i64) -> Self {
        Self {
            user_id,
            ttl_secs,
            expire_at: expiry_after(Utc::now(), ttl_secs),
            current_stage: ResourceRef::default(),
            context: UserContext::new(user_id),
            pending_inputs: HashMap::new(),
            pending_callbacks: HashMap::new(),
            stage_messages: Vec::new(),
        }
    }

    pub fn state(&self) -> DialogState<'_> {
        if self.current_stage.is_empty() {
            DialogState::NoStage
        } else {
            DialogState::InStage(&self.current_stage)
        }
    }

    pub fn current_stage(&self) -> Option<&ResourceRef> {
        match self.state() {
            DialogState::NoStage => None,
            DialogState::InStage(stage) => Some(stage),
        }
    }

    /// Move to `stage`; reply bindings of the old stage are dropped
    pub fn enter_stage(&mut self, stage: ResourceRef) {
        self.current_stage = stage;
        self.pending_inputs.clear();
    }

    pub fn bind_input(&mut self, text: impl Into<String>, action: ResourceRef) {
        self.pending_inputs.insert(text.into(), action);
    }

    pub fn pending_input(&self, text: &str) -> Option<&ResourceRef> {
        self.pending_inputs.get(text)
    }

    pub fn register_callback(
        &mut self,
        token: impl Into<String>,
        retention: CallbackRetention,
        handler: ResourceRef,
    ) {
        self.pending_callbacks
            .insert(token.into(), PendingCallback { handler, retention });
    }

    /// Resolve a token to its handler, consuming delete-on-use bindings
    pub fn resolve_callback(&mut self, token: &str) -> Result<ResourceRef, EngineError> {
        let retention = self.pending_callbacks.get(token).map(|pending| pending.retention);
        let handler = match retention {
            Some(CallbackRetention::Retain) => self
                .pending_callbacks
                .get(token)
                .map(|pending| pending.handler.clone()),
            Some(CallbackRetention::DeleteOnUse) => self
                .pending_callbacks
                .remove(token)
                .map(|pending| pending.handler),
            None => None,
        };
        handler.ok_or_else(|| EngineError::not_found(EntityKind::CallbackToken, token))
    }

    pub fn clear_callbacks(&mut self) {
        self.pending_callbacks.clear();
    }

    pub fn track_message(&mut self, message_id: MessageId) {
        self.stage_messages.push(message_id);
    }

    /// Stop tracking every stage message, returning them for deletion
    pub fn take_stage_messages(&mut self) -> Vec<MessageId> {
        std::mem::take(&mut self.stage_messages)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expire_at <= now
    }

    /// Push expiry to `now + ttl`
    pub fn refresh_expiry(&mut self, now: DateTime<Utc>) {
        self.expire_at = expiry_after(now, self.ttl_secs);
    }
}

/// `now + ttl`, saturating at the ends of the representable range
fn expiry_after(now: DateTime<Utc>, ttl_secs: i64) -> DateTime<Utc> {
    TimeDelta::try_seconds(ttl_secs)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(if ttl_secs < 0 {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        })
}
