//! Effects produced by applying an update to a session

use crate::model::{CallbackAnswer, MessageId, OutboundMessage};

/// Side effects the dispatcher executes, in order, after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Acknowledge the pressed inline button
    AnswerCallback {
        query_id: String,
        answer: CallbackAnswer,
    },

    /// Deliver a message; its ID is tracked on success
    SendMessage { message: OutboundMessage },

    /// Remove a message left over from the previous stage
    DeleteMessage { message_id: MessageId },

    /// Save the session; always the last effect
    PersistSession,
}

impl Effect {
    pub fn send(message: OutboundMessage) -> Self {
        Effect::SendMessage { message }
    }

    pub fn delete(message_id: MessageId) -> Self {
        Effect::DeleteMessage { message_id }
    }
}
