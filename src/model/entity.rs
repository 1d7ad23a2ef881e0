//! Registrable entities: commands, stages, callback handlers and actions

use super::{OutboundMessage, ResourceRef, UserId, UserUpdate};
use crate::state_machine::{InboundEvent, UserContext};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// A slash command bound to an action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: ResourceRef,
    action: ResourceRef,
}

impl Command {
    pub fn new(name: impl Into<ResourceRef>, action: impl Into<ResourceRef>) -> Self {
        Self {
            name: name.into(),
            action: action.into(),
        }
    }

    pub fn name(&self) -> &ResourceRef {
        &self.name
    }

    pub fn action_ref(&self) -> &ResourceRef {
        &self.action
    }
}

/// Handler for inline-button presses, bound to an action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackHandler {
    name: ResourceRef,
    action: ResourceRef,
}

impl CallbackHandler {
    pub fn new(name: impl Into<ResourceRef>, action: impl Into<ResourceRef>) -> Self {
        Self {
            name: name.into(),
            action: action.into(),
        }
    }

    pub fn name(&self) -> &ResourceRef {
        &self.name
    }

    pub fn action_ref(&self) -> &ResourceRef {
        &self.action
    }
}

/// Business logic invoked for a resolved event
pub trait ActionHandler: Send + Sync {
    fn invoke(&self, ctx: &UserContext, event: &InboundEvent) -> UserUpdate;
}

impl<F> ActionHandler for F
where
    F: Fn(&UserContext, &InboundEvent) -> UserUpdate + Send + Sync,
{
    fn invoke(&self, ctx: &UserContext, event: &InboundEvent) -> UserUpdate {
        self(ctx, event)
    }
}

/// Named action; the engine only invokes it and consumes the update
#[derive(Clone)]
pub struct Action {
    name: ResourceRef,
    handler: Arc<dyn ActionHandler>,
}

impl Action {
    pub fn new(name: impl Into<ResourceRef>, handler: impl ActionHandler + 'static) -> Self {
        Self {
            name: name.into(),
            handler: Arc::new(handler),
        }
    }

    pub fn name(&self) -> &ResourceRef {
        &self.name
    }

    pub fn invoke(&self, ctx: &UserContext, event: &InboundEvent) -> UserUpdate {
        self.handler.invoke(ctx, event)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action").field("name", &self.name).finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct InitializerError(pub String);

/// Produces the messages shown when a user enters a stage
pub trait StageInitializer: Send + Sync {
    fn initialize(
        &self,
        user_id: UserId,
        stage: &ResourceRef,
    ) -> Result<Vec<OutboundMessage>, InitializerError>;
}

impl<F> StageInitializer for F
where
    F: Fn(UserId, &ResourceRef) -> Result<Vec<OutboundMessage>, InitializerError> + Send + Sync,
{
    fn initialize(
        &self,
        user_id: UserId,
        stage: &ResourceRef,
    ) -> Result<Vec<OutboundMessage>, InitializerError> {
        self(user_id, stage)
    }
}

/// Initializer that always shows the same messages
#[derive(Debug, Clone)]
pub struct StaticStageInitializer {
    messages: Vec<OutboundMessage>,
}

impl StaticStageInitializer {
    pub fn new(messages: impl IntoIterator<Item = OutboundMessage>) -> Self {
        Self {
            messages: messages.into_iter().collect(),
        }
    }
}

impl StageInitializer for StaticStageInitializer {
    fn initialize(
        &self,
        _user_id: UserId,
        _stage: &ResourceRef,
    ) -> Result<Vec<OutboundMessage>, InitializerError> {
        Ok(self.messages.clone())
    }
}

/// A named point in a dialog
#[derive(Clone)]
pub struct Stage {
    name: ResourceRef,
    custom_input_allowed: bool,
    default_action: ResourceRef,
    initializer: Option<Arc<dyn StageInitializer>>,
    redisplay: bool,
}

impl Stage {
    pub fn new(name: impl Into<ResourceRef>) -> Self {
        Self {
            name: name.into(),
            custom_input_allowed: false,
            default_action: ResourceRef::default(),
            initializer: None,
            redisplay: true,
        }
    }

    #[must_use]
    pub fn with_initializer(mut self, initializer: impl StageInitializer + 'static) -> Self {
        self.initializer = Some(Arc::new(initializer));
        self
    }

    /// Accept free text, routing it to `action`
    #[must_use]
    pub fn with_default_action(mut self, action: impl Into<ResourceRef>) -> Self {
        self.default_action = action.into();
        self.custom_input_allowed = true;
        self
    }

    #[must_use]
    pub fn custom_input_allowed(mut self, allowed: bool) -> Self {
        self.custom_input_allowed = allowed;
        self
    }

    /// Re-show this stage after messages are sent while staying in it
    #[must_use]
    pub fn redisplay(mut self, redisplay: bool) -> Self {
        self.redisplay = redisplay;
        self
    }

    pub fn name(&self) -> &ResourceRef {
        &self.name
    }

    pub fn allows_custom_input(&self) -> bool {
        self.custom_input_allowed
    }

    pub fn default_action_ref(&self) -> &ResourceRef {
        &self.default_action
    }

    pub fn redisplays(&self) -> bool {
        self.redisplay
    }

    /// Messages shown on entry; a stage without initializer shows nothing
    pub fn initialize(&self, user_id: UserId) -> Result<Vec<OutboundMessage>, InitializerError> {
        match &self.initializer {
            Some(initializer) => initializer.initialize(user_id, &self.name),
            None => Ok(Vec::new()),
        }
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("custom_input_allowed", &self.custom_input_allowed)
            .field("default_action", &self.default_action)
            .field("has_initializer", &self.initializer.is_some())
            .field("redisplay", &self.redisplay)
            .finish()
    }
}
