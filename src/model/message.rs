//! Outbound messages and keyboards

use super::ResourceRef;
use serde::{Deserialize, Serialize};

/// A reply-keyboard button; pressing it sends its text back as a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyButton {
    pub text: String,
    /// Action invoked when the user sends this button's text
    pub action: ResourceRef,
}

impl ReplyButton {
    pub fn new(text: impl Into<String>, action: impl Into<ResourceRef>) -> Self {
        Self {
            text: text.into(),
            action: action.into(),
        }
    }
}

/// What happens to a callback token once it has been resolved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackRetention {
    /// Removed on first resolution (at-most-once press)
    #[default]
    DeleteOnUse,
    /// Resolves repeatedly until the session drops it
    Retain,
}

/// An inline (interactive) button bound to a callback handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineButton {
    pub text: String,
    pub handler: ResourceRef,
    pub retention: CallbackRetention,
    /// Opaque token minted by the dispatcher before the button is sent
    pub token: Option<String>,
}

impl InlineButton {
    pub fn new(text: impl Into<String>, handler: impl Into<ResourceRef>) -> Self {
        Self {
            text: text.into(),
            handler: handler.into(),
            retention: CallbackRetention::DeleteOnUse,
            token: None,
        }
    }

    #[must_use]
    pub fn retained(mut self) -> Self {
        self.retention = CallbackRetention::Retain;
        self
    }
}

/// How buttons are packed into keyboard rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyboardLayout {
    #[default]
    OnePerRow,
    TwoPerRow,
    ThreePerRow,
    FourPerRow,
    FivePerRow,
    /// Every button on a single row
    SingleRow,
}

impl KeyboardLayout {
    fn row_width(self) -> Option<usize> {
        match self {
            Self::OnePerRow => Some(1),
            Self::TwoPerRow => Some(2),
            Self::ThreePerRow => Some(3),
            Self::FourPerRow => Some(4),
            Self::FivePerRow => Some(5),
            Self::SingleRow => None,
        }
    }

    /// Arrange buttons into rows; the last row holds the remainder
    pub fn arrange<T>(self, buttons: impl IntoIterator<Item = T>) -> Vec<Vec<T>> {
        let buttons: Vec<T> = buttons.into_iter().collect();
        if buttons.is_empty() {
            return Vec::new();
        }
        let Some(width) = self.row_width() else {
            return vec![buttons];
        };

        let mut rows = Vec::with_capacity(buttons.len().div_ceil(width));
        let mut row = Vec::with_capacity(width);
        for button in buttons {
            row.push(button);
            if row.len() == width {
                rows.push(std::mem::replace(&mut row, Vec::with_capacity(width)));
            }
        }
        if !row.is_empty() {
            rows.push(row);
        }
        rows
    }
}

/// A message handed to the transport
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundMessage {
    pub text: String,
    pub reply_keyboard: Vec<Vec<ReplyButton>>,
    pub inline_keyboard: Vec<Vec<InlineButton>>,
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_reply_keyboard(mut self, rows: Vec<Vec<ReplyButton>>) -> Self {
        self.reply_keyboard = rows;
        self
    }

    #[must_use]
    pub fn with_inline_keyboard(mut self, rows: Vec<Vec<InlineButton>>) -> Self {
        self.inline_keyboard = rows;
        self
    }

    pub fn reply_buttons(&self) -> impl Iterator<Item = &ReplyButton> {
        self.reply_keyboard.iter().flatten()
    }

    pub fn inline_buttons(&self) -> impl Iterator<Item = &InlineButton> {
        self.inline_keyboard.iter().flatten()
    }

    pub fn inline_buttons_mut(&mut self) -> impl Iterator<Item = &mut InlineButton> {
        self.inline_keyboard.iter_mut().flatten()
    }

    pub fn has_keyboard(&self) -> bool {
        self.reply_buttons().next().is_some() || self.inline_buttons().next().is_some()
    }
}
