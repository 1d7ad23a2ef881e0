//! JSON bot schema

use crate::model::KeyboardLayout;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotSchema {
    #[serde(default)]
    pub auther: Option<AutherSchema>,
    #[serde(default)]
    pub actions: Vec<ActionSchema>,
    #[serde(default)]
    pub callback_handlers: Vec<CallbackHandlerSchema>,
    #[serde(default)]
    pub commands: Vec<CommandSchema>,
    #[serde(default)]
    pub stages: Vec<StageSchema>,
}

/// Access policy; a blacklist wins when both lists are present
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutherSchema {
    #[serde(default)]
    pub whitelist: Option<Vec<i64>>,
    #[serde(default)]
    pub blacklist: Option<Vec<i64>>,
}

/// Action that replies with a templated message and may move the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSchema {
    pub name: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transit: Option<TransitSchema>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitSchema {
    pub target_ref: String,
    #[serde(default)]
    pub clean: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackHandlerSchema {
    pub name: String,
    pub action_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSchema {
    pub name: String,
    pub action_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSchema {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub default_action_ref: String,
    #[serde(default)]
    pub input_allowed: bool,
    /// Re-show the stage after replies while staying in it
    #[serde(default = "default_true")]
    pub redisplay: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initializer: Option<InitializerSchema>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializerSchema {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyboard: Option<KeyboardSchema>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyboardSchema {
    #[serde(default)]
    pub layout: KeyboardLayout,
    pub buttons: Vec<ButtonSchema>,
}

/// Reply-keyboard button: its text is bound to `action_ref`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonSchema {
    pub name: String,
    pub action_ref: String,
}
