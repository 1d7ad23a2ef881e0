//! Inbound chat events and their classification

use crate::model::{MessageId, UserId};
use serde::{Deserialize, Serialize};

/// Profile details the platform reports about the sender
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderProfile {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub language_code: Option<String>,
}

/// Raw payload of an inbound event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    Message {
        message_id: MessageId,
        text: String,
    },
    CallbackQuery {
        query_id: String,
        /// Token carried by the pressed inline button
        data: String,
        message_id: Option<MessageId>,
    },
}

/// One event received from the chat platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub user_id: UserId,
    pub payload: EventPayload,
    pub sender: Option<SenderProfile>,
}

/// How the dispatcher treats an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind<'a> {
    Command { name: &'a str, args: &'a str },
    Text(&'a str),
    Callback { token: &'a str, query_id: &'a str },
}

impl InboundEvent {
    pub fn message(user_id: UserId, message_id: MessageId, text: impl Into<String>) -> Self {
        Self {
            user_id,
            payload: EventPayload::Message {
                message_id,
                text: text.into(),
            },
            sender: None,
        }
    }

    pub fn callback(user_id: UserId, query_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user_id,
            payload: EventPayload::CallbackQuery {
                query_id: query_id.into(),
                data: token.into(),
                message_id: None,
            },
            sender: None,
        }
    }

    #[must_use]
    pub fn with_sender(mut self, sender: SenderProfile) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Classify the event; a message with a command prefix is always a command
    pub fn classify(&self) -> EventKind<'_> {
        match &self.payload {
            EventPayload::Message { text, .. } => match parse_command(text) {
                Some((name, args)) => EventKind::Command { name, args },
                None => EventKind::Text(text.as_str()),
            },
            EventPayload::CallbackQuery { query_id, data, .. } => EventKind::Callback {
                token: data.as_str(),
                query_id: query_id.as_str(),
            },
        }
    }

    /// ID of the user's own message, if this event carries one
    pub fn message_id(&self) -> Option<MessageId> {
        match &self.payload {
            EventPayload::Message { message_id, .. } => Some(*message_id),
            EventPayload::CallbackQuery { .. } => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Message { text, .. } => Some(text.as_str()),
            EventPayload::CallbackQuery { .. } => None,
        }
    }

    pub fn is_callback(&self) -> bool {
        matches!(self.payload, EventPayload::CallbackQuery { .. })
    }
}

/// Split `/name@bot args` into `("name", "args")`
fn parse_command(text: &str) -> Option<(&str, &str)> {
    let rest = text.trim_start().strip_prefix('/')?;
    let (head, args) = match rest.split_once(char::is_whitespace) {
        Some((head, args)) => (head, args.trim()),
        None => (rest, ""),
    };
    let name = head.split('@').next().unwrap_or_default();
    if name.is_empty() {
        return None;
    }
    Some((name, args))
}
