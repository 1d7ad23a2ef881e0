//! Results produced by actions

use super::{OutboundMessage, ResourceRef};

/// Request to move the session to another stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transit {
    pub target: ResourceRef,
    /// Delete every message tracked in the stage being left
    pub clean: bool,
}

impl Transit {
    pub fn to(target: impl Into<ResourceRef>) -> Self {
        Self {
            target: target.into(),
            clean: false,
        }
    }

    pub fn clean(target: impl Into<ResourceRef>) -> Self {
        Self {
            target: target.into(),
            clean: true,
        }
    }
}

/// Acknowledgment shown for a pressed inline button
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackAnswer {
    pub text: String,
    pub show_alert: bool,
}

impl CallbackAnswer {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            show_alert: false,
        }
    }
}

/// Everything an action asks the engine to do for the user
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserUpdate {
    pub messages: Vec<OutboundMessage>,
    pub transit: Option<Transit>,
    pub callback_answer: Option<CallbackAnswer>,
}

impl UserUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_message(mut self, message: OutboundMessage) -> Self {
        self.messages.push(message);
        self
    }

    #[must_use]
    pub fn with_messages(mut self, messages: impl IntoIterator<Item = OutboundMessage>) -> Self {
        self.messages.extend(messages);
        self
    }

    #[must_use]
    pub fn with_transit(mut self, transit: Transit) -> Self {
        self.transit = Some(transit);
        self
    }

    #[must_use]
    pub fn with_callback_answer(mut self, answer: CallbackAnswer) -> Self {
        self.callback_answer = Some(answer);
        self
    }
}
