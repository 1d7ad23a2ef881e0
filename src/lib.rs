//! botflow - stage-based conversational bot engine
//!
//! Chat events flow through a per-user pipeline: authorize, load the session,
//! resolve an action from the registry, run it, apply the resulting update as
//! a pure transition, then execute the effects against the transport and
//! session store.

#![allow(
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

pub mod api;
pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod console;
pub mod db;
pub mod error;
pub mod model;
pub mod registry;
pub mod runtime;
pub mod session_store;
pub mod state_machine;
pub mod telemetry;
