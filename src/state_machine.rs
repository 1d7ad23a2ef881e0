//! Per-user dialog state machine
//!
//! Sessions hold the user's position in the dialog; `transition` applies an
//! action's update to a session and returns the effects to execute.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;


pub use effect::Effect;
pub use event::{EventKind, EventPayload, InboundEvent, SenderProfile};
pub use state::{
    DialogState, PendingCallback, Session, UserContext, DEFAULT_SESSION_TTL_SECS,
    MAX_SESSION_TTL_SECS,
};
pub use transition::{transition, StageFollowUp, TransitionInput, TransitionResult};
