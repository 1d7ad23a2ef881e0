//! Pure application of an action's update to a session
//!
//! Every lookup that can fail (target stage, initializer output) happens
//! before this runs, so applying an update never fails half-way.

use super::{Effect, Session};
use crate::model::{MessageId, OutboundMessage, ResourceRef, UserUpdate};

/// What happens to the dialog after the action's own messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageFollowUp {
    /// Enter `stage`, showing its initializer output
    Enter {
        stage: ResourceRef,
        messages: Vec<OutboundMessage>,
        clean: bool,
    },
    /// Re-show the current stage after the action's messages
    Redisplay { messages: Vec<OutboundMessage> },
    /// Leave the dialog position untouched
    Stay,
}

/// Inputs to one transition
#[derive(Debug, Clone)]
pub struct TransitionInput {
    pub update: UserUpdate,
    pub follow_up: StageFollowUp,
    /// ID of the user's own message that triggered the update
    pub incoming_message: Option<MessageId>,
    /// Callback query to acknowledge, if the event was a button press
    pub callback_query: Option<String>,
}

/// Result of a transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_session: Session,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(session: Session) -> Self {
        Self {
            new_session: session,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Apply an update to a session.
///
/// `mint_token` supplies one fresh token per inline button in the outbound
/// set. Effects come out as: callback answer, sends, deletions, persist.
pub fn transition(
    session: Session,
    input: TransitionInput,
    mut mint_token: impl FnMut() -> String,
) -> TransitionResult {
    let TransitionInput {
        update,
        follow_up,
        incoming_message,
        callback_query,
    } = input;
    let mut session = session;
    let mut deletions = Vec::new();

    if let Some(message_id) = incoming_message {
        session.track_message(message_id);
    }

    let answer = match (callback_query, update.callback_answer) {
        (Some(query_id), Some(answer)) => Some(Effect::AnswerCallback { query_id, answer }),
        _ => None,
    };

    let mut outbound = update.messages;
    match follow_up {
        StageFollowUp::Enter {
            stage,
            messages,
            clean,
        } => {
            session.enter_stage(stage);
            if clean {
                deletions = session.take_stage_messages();
            }
            if clean || messages.iter().any(OutboundMessage::has_keyboard) {
                session.clear_callbacks();
            }
            bind_reply_buttons(&mut session, &messages);
            outbound.extend(messages);
        }
        StageFollowUp::Redisplay { messages } => {
            if !outbound.is_empty() {
                // the re-shown keyboard supersedes the previous display
                if messages.iter().any(OutboundMessage::has_keyboard) {
                    session.clear_callbacks();
                }
                bind_reply_buttons(&mut session, &messages);
                outbound.extend(messages);
            }
        }
        StageFollowUp::Stay => {}
    }

    for message in &mut outbound {
        for button in message.inline_buttons_mut() {
            let token = mint_token();
            session.register_callback(token.clone(), button.retention, button.handler.clone());
            button.token = Some(token);
        }
    }

    TransitionResult::new(session)
        .with_effects(answer)
        .with_effects(outbound.into_iter().map(Effect::send))
        .with_effects(deletions.into_iter().map(Effect::delete))
        .with_effect(Effect::PersistSession)
}

fn bind_reply_buttons(session: &mut Session, messages: &[OutboundMessage]) {
    for button in messages.iter().flat_map(OutboundMessage::reply_buttons) {
        session.bind_input(button.text.clone(), button.action.clone());
    }
}
