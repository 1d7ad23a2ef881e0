//! Build a registry and access policy from a declarative JSON schema

mod schema;

pub use schema::*;

use crate::auth::{AllowAll, Blacklist, Whitelist};
use crate::error::{EngineError, EntityKind};
use crate::model::{
    Action, CallbackHandler, Command, OutboundMessage, ReplyButton, Stage, StaticStageInitializer,
    Transit, UserUpdate,
};
use crate::registry::EntityRegistry;
use crate::runtime::Authorizer;
use crate::state_machine::{InboundEvent, UserContext};
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("Failed to read schema {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid schema: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid schema entity: {0}")]
    Registry(#[from] EngineError),
}

/// A populated registry plus the schema's access policy
pub struct Bootstrap {
    pub registry: EntityRegistry,
    pub authorizer: Arc<dyn Authorizer>,
}

impl std::fmt::Debug for Bootstrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bootstrap").finish_non_exhaustive()
    }
}

pub fn from_file(path: impl AsRef<Path>) -> Result<Bootstrap, BootstrapError> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path).map_err(|source| BootstrapError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let bootstrap = from_json(&json)?;
    tracing::info!(path = %path.display(), "Loaded bot schema");
    Ok(bootstrap)
}

pub fn from_json(json: &str) -> Result<Bootstrap, BootstrapError> {
    build(serde_json::from_str(json)?)
}

/// Register every schema entity, then check that all references resolve
pub fn build(schema: BotSchema) -> Result<Bootstrap, BootstrapError> {
    validate_references(&schema)?;

    let registry = EntityRegistry::new();
    let authorizer = authorizer(schema.auther.as_ref());

    for action in schema.actions {
        registry.register_action(templated_action(action))?;
    }
    for handler in schema.callback_handlers {
        registry.register_callback_handler(CallbackHandler::new(handler.name, handler.action_ref))?;
    }
    for command in schema.commands {
        registry.register_command(Command::new(command.name, command.action_ref))?;
    }
    for stage in schema.stages {
        registry.register_stage(stage_from_schema(stage))?;
    }

    Ok(Bootstrap {
        registry,
        authorizer,
    })
}

fn authorizer(schema: Option<&AutherSchema>) -> Arc<dyn Authorizer> {
    match schema {
        Some(AutherSchema {
            blacklist: Some(users),
            ..
        }) => Arc::new(Blacklist::new(users.iter().copied())),
        Some(AutherSchema {
            whitelist: Some(users),
            ..
        }) => Arc::new(Whitelist::new(users.iter().copied())),
        _ => Arc::new(AllowAll),
    }
}

fn validate_references(schema: &BotSchema) -> Result<(), EngineError> {
    let actions: HashSet<&str> = schema.actions.iter().map(|a| a.name.as_str()).collect();
    let stages: HashSet<&str> = schema.stages.iter().map(|s| s.name.as_str()).collect();
    for command in &schema.commands {
        require(&actions, EntityKind::Action, &command.action_ref)?;
    }
    for handler in &schema.callback_handlers {
        require(&actions, EntityKind::Action, &handler.action_ref)?;
    }
    for action in &schema.actions {
        if let Some(transit) = &action.transit {
            require(&stages, EntityKind::Stage, &transit.target_ref)?;
        }
    }
    for stage in &schema.stages {
        if !stage.default_action_ref.is_empty() {
            require(&actions, EntityKind::Action, &stage.default_action_ref)?;
        }
        let buttons = stage
            .initializer
            .iter()
            .filter_map(|init| init.keyboard.as_ref())
            .flat_map(|keyboard| &keyboard.buttons);
        for button in buttons {
            require(&actions, EntityKind::Action, &button.action_ref)?;
        }
    }
    Ok(())
}

fn require(known: &HashSet<&str>, kind: EntityKind, reference: &str) -> Result<(), EngineError> {
    if known.contains(reference) {
        Ok(())
    } else {
        Err(EngineError::not_found(kind, reference))
    }
}

fn templated_action(schema: ActionSchema) -> Action {
    let ActionSchema {
        name,
        message,
        transit,
    } = schema;
    let transit = transit.map(|t| Transit {
        target: t.target_ref.into(),
        clean: t.clean,
    });

    Action::new(name, move |ctx: &UserContext, _event: &InboundEvent| {
        let mut update = UserUpdate::new();
        if !message.is_empty() {
            // a broken template is shown to the user rather than failing the event
            let text = render_template(&message, ctx).unwrap_or_else(|e| e.to_string());
            update = update.with_message(OutboundMessage::text(text));
        }
        if let Some(transit) = &transit {
            update = update.with_transit(transit.clone());
        }
        update
    })
}

fn stage_from_schema(schema: StageSchema) -> Stage {
    let mut stage = Stage::new(schema.name).redisplay(schema.redisplay);
    if !schema.default_action_ref.is_empty() {
        stage = stage.with_default_action(schema.default_action_ref);
    }
    stage = stage.custom_input_allowed(schema.input_allowed);
    if let Some(initializer) = schema.initializer {
        let mut message = OutboundMessage::text(initializer.message);
        if let Some(keyboard) = initializer.keyboard {
            let buttons = keyboard
                .buttons
                .into_iter()
                .map(|button| ReplyButton::new(button.name, button.action_ref));
            message = message.with_reply_keyboard(keyboard.layout.arrange(buttons));
        }
        stage = stage.with_initializer(StaticStageInitializer::new([message]));
    }
    stage
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("template error: unknown field '{0}'")]
    UnknownField(String),
    #[error("template error: unclosed placeholder")]
    Unclosed,
}

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*\.?([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)?)\s*\}\}")
            .unwrap_or_else(|e| unreachable!("placeholder pattern is valid: {e}"))
    })
}

/// Substitute `{{field}}` placeholders from the user context.
///
/// Known fields are `user_id`, `lang`, `name`, `last_name` and `username`;
/// anything else is looked up in `misc`, optionally as `misc.key`. Unset
/// profile fields render as empty text.
pub fn render_template(template: &str, ctx: &UserContext) -> Result<String, TemplateError> {
    let pattern = placeholder();
    if pattern.replace_all(template, "").contains("{{") {
        return Err(TemplateError::Unclosed);
    }

    let mut error = None;
    let rendered = pattern.replace_all(template, |caps: &Captures| {
        match lookup(ctx, &caps[1]) {
            Ok(value) => value,
            Err(e) => {
                if error.is_none() {
                    error = Some(e);
                }
                String::new()
            }
        }
    });
    match error {
        Some(e) => Err(e),
        None => Ok(rendered.into_owned()),
    }
}

fn lookup(ctx: &UserContext, field: &str) -> Result<String, TemplateError> {
    let profile = |value: &Option<String>| Ok(value.clone().unwrap_or_default());
    match field {
        "user_id" => Ok(ctx.user_id.to_string()),
        "lang" => profile(&ctx.lang),
        "name" => profile(&ctx.name),
        "last_name" => profile(&ctx.last_name),
        "username" => profile(&ctx.username),
        _ => {
            let key = field.strip_prefix("misc.").unwrap_or(field);
            ctx.misc
                .get(key)
                .map(|value| match value {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
                .ok_or_else(|| TemplateError::UnknownField(field.to_string()))
        }
    }
}
