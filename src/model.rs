//! Registry entities and the outbound message model
//!
//! Everything here is immutable once registered; per-user variation comes
//! from registry overrides or from the user ID handed to initializers.

mod entity;
mod message;
mod refs;
mod update;

pub use entity::{
    Action, ActionHandler, CallbackHandler, Command, InitializerError, Stage, StageInitializer,
    StaticStageInitializer,
};
pub use message::{CallbackRetention, InlineButton, KeyboardLayout, OutboundMessage, ReplyButton};
pub use refs::ResourceRef;
pub use update::{CallbackAnswer, Transit, UserUpdate};

/// Chat-platform user identifier
pub type UserId = i64;

/// Chat-platform message identifier
pub type MessageId = i64;
