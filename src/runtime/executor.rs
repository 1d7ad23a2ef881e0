//! Event dispatch pipeline

use super::traits::{Authorizer, SessionStore, Telemetry, Transport};
use super::user_locks::UserLocks;
use crate::auth::AllowAll;
use crate::error::{EngineError, EngineResult};
use crate::model::{Action, Command, MessageId, ResourceRef, UserId, UserUpdate};
use crate::registry::EntityRegistry;
use crate::state_machine::{
    transition, Effect, EventKind, InboundEvent, Session, StageFollowUp, TransitionInput,
    TransitionResult, DEFAULT_SESSION_TTL_SECS,
};
use crate::telemetry::NoopTelemetry;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Command run for plain text from a user who is not in any stage
pub const START_COMMAND: &str = "start";

/// What one dispatched event produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// IDs of messages the transport accepted, in send order
    pub sent: Vec<MessageId>,
    /// Stage the user is in after the event
    pub stage: Option<ResourceRef>,
}

/// Turns inbound events into session mutations and outbound messages
pub struct Dispatcher<S, T>
where
    S: SessionStore + 'static,
    T: Transport + 'static,
{
    registry: Arc<EntityRegistry>,
    store: S,
    transport: T,
    authorizer: Arc<dyn Authorizer>,
    telemetry: Arc<dyn Telemetry>,
    locks: UserLocks,
    session_ttl_secs: i64,
}

impl<S, T> Dispatcher<S, T>
where
    S: SessionStore + 'static,
    T: Transport + 'static,
{
    /// Fails when the registry has no global `start` command
    pub fn new(registry: Arc<EntityRegistry>, store: S, transport: T) -> EngineResult<Self> {
        registry.get_global::<Command>(START_COMMAND)?;
        Ok(Self {
            registry,
            store,
            transport,
            authorizer: Arc::new(AllowAll),
            telemetry: Arc::new(NoopTelemetry),
            locks: UserLocks::new(),
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
        })
    }

    #[must_use]
    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// TTL given to sessions created by this dispatcher
    #[must_use]
    pub fn with_session_ttl(mut self, ttl_secs: i64) -> Self {
        self.session_ttl_secs = ttl_secs;
        self
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Process one event end to end.
    ///
    /// Resolution and initializer errors abort before the session is touched.
    /// A send failure stops the remaining sends; the session is still saved and
    /// the failure is returned afterwards.
    pub async fn dispatch(&self, event: InboundEvent) -> EngineResult<DispatchReport> {
        let started = Instant::now();
        let result = self.process(&event).await;
        self.telemetry.request_duration(started.elapsed());
        result
    }

    async fn process(&self, event: &InboundEvent) -> EngineResult<DispatchReport> {
        let user_id = event.user_id;
        if let Err(e) = self.authorizer.authorize(user_id) {
            self.telemetry.unauthenticated_request(user_id);
            tracing::info!(user_id, "Dropping event from unauthorized user");
            return Err(e);
        }
        if !event.is_callback() {
            self.telemetry.user_message_received();
        }

        let _guard = self.locks.acquire(user_id).await;

        let mut session = self.load_session(event).await?;
        let (action, resolved) = self.resolve_action(&mut session, event)?;
        tracing::debug!(user_id, action = %action.name(), "Invoking action");
        let update = action.invoke(&session.context, event);
        let follow_up = self.plan_follow_up(&session, &update)?;

        let entered = match &follow_up {
            StageFollowUp::Enter { stage, .. } => Some(stage.clone()),
            _ => None,
        };
        let callback_query = match event.classify() {
            EventKind::Callback { query_id, .. } => Some(query_id.to_string()),
            _ => None,
        };
        let input = TransitionInput {
            update,
            follow_up,
            incoming_message: event.message_id(),
            callback_query,
        };
        let TransitionResult {
            new_session,
            effects,
        } = transition(session, input, mint_token);

        self.record_resolution(&resolved);
        if let Some(stage) = &entered {
            self.telemetry.stage_reached(stage);
            tracing::info!(user_id, stage = %stage, "Entered stage");
        }

        let report = self.execute_effects(new_session, effects).await?;
        tracing::info!(user_id, sent = report.sent.len(), "Event processed");
        Ok(report)
    }

    async fn load_session(&self, event: &InboundEvent) -> EngineResult<Session> {
        let user_id = event.user_id;
        let mut session = match self.store.get(user_id).await {
            Ok(session) => session,
            Err(e) if e.is_not_found() => {
                tracing::debug!(user_id, "Creating session");
                Session::with_ttl(user_id, self.session_ttl_secs)
            }
            Err(e) => {
                tracing::error!(user_id, error = %e, "Failed to load session");
                return Err(e.into());
            }
        };
        if let Some(sender) = &event.sender {
            session.context.absorb_profile(sender);
        }
        Ok(session)
    }

    /// Pick the action for an event, honouring the user's overrides
    fn resolve_action(
        &self,
        session: &mut Session,
        event: &InboundEvent,
    ) -> EngineResult<(Arc<Action>, Resolved)> {
        let user_id = session.user_id;
        match event.classify() {
            EventKind::Command { name, .. } => self.command_action(user_id, name),
            EventKind::Text(text) => {
                let Some(stage_ref) = session.current_stage() else {
                    return self.command_action(user_id, START_COMMAND);
                };
                let action_ref = match session.pending_input(text) {
                    Some(bound) => bound.clone(),
                    None => {
                        let stage = self.registry.stage(user_id, stage_ref.as_str())?;
                        if !stage.allows_custom_input() {
                            return Err(EngineError::UnrecognizedInput {
                                stage: stage_ref.clone(),
                            });
                        }
                        stage.default_action_ref().clone()
                    }
                };
                let action = self.registry.action(user_id, action_ref.as_str())?;
                let resolved = Resolved::StageAction(action.name().clone());
                Ok((action, resolved))
            }
            EventKind::Callback { token, .. } => {
                let handler_ref = session.resolve_callback(token)?;
                let handler = self
                    .registry
                    .callback_handler(user_id, handler_ref.as_str())?;
                let action = self
                    .registry
                    .action(user_id, handler.action_ref().as_str())?;
                Ok((action, Resolved::Callback(handler.name().clone())))
            }
        }
    }

    fn command_action(
        &self,
        user_id: UserId,
        name: &str,
    ) -> EngineResult<(Arc<Action>, Resolved)> {
        let command = self.registry.command(user_id, name)?;
        let action = self
            .registry
            .action(user_id, command.action_ref().as_str())?;
        Ok((action, Resolved::Command(command.name().clone())))
    }

    fn record_resolution(&self, resolved: &Resolved) {
        match resolved {
            Resolved::Command(command) => self.telemetry.command_executed(command),
            Resolved::StageAction(action) => self.telemetry.stage_action_processed(action),
            Resolved::Callback(handler) => self.telemetry.callback_processed(handler),
        }
    }

    /// Resolve the stage to show next and run its initializer
    fn plan_follow_up(&self, session: &Session, update: &UserUpdate) -> EngineResult<StageFollowUp> {
        let user_id = session.user_id;
        if let Some(transit) = &update.transit {
            let stage = self.registry.stage(user_id, transit.target.as_str())?;
            let messages = stage
                .initialize(user_id)
                .map_err(|e| EngineError::StageInitializer {
                    stage: transit.target.clone(),
                    message: e.to_string(),
                })?;
            return Ok(StageFollowUp::Enter {
                stage: transit.target.clone(),
                messages,
                clean: transit.clean,
            });
        }

        let Some(current) = session.current_stage() else {
            return Ok(StageFollowUp::Stay);
        };
        if update.messages.is_empty() {
            return Ok(StageFollowUp::Stay);
        }
        let stage = self.registry.stage(user_id, current.as_str())?;
        if !stage.redisplays() {
            return Ok(StageFollowUp::Stay);
        }
        let messages = stage
            .initialize(user_id)
            .map_err(|e| EngineError::StageInitializer {
                stage: current.clone(),
                message: e.to_string(),
            })?;
        Ok(StageFollowUp::Redisplay { messages })
    }

    async fn execute_effects(
        &self,
        mut session: Session,
        effects: Vec<Effect>,
    ) -> EngineResult<DispatchReport> {
        let user_id = session.user_id;
        let mut sent = Vec::new();
        let mut send_failure = None;

        for effect in effects {
            match effect {
                Effect::AnswerCallback { query_id, answer } => {
                    if let Err(e) = self.transport.answer_callback(&query_id, &answer).await {
                        tracing::warn!(user_id, error = %e, "Failed to answer callback");
                    }
                }
                Effect::SendMessage { message } => {
                    if send_failure.is_some() {
                        continue;
                    }
                    match self.transport.send(user_id, &message).await {
                        Ok(message_id) => {
                            session.track_message(message_id);
                            sent.push(message_id);
                            self.telemetry.bot_message_sent();
                        }
                        Err(e) => {
                            tracing::warn!(user_id, error = %e, "Failed to send message, skipping the rest");
                            send_failure = Some(e);
                        }
                    }
                }
                Effect::DeleteMessage { message_id } => {
                    if let Err(e) = self.transport.delete(user_id, message_id).await {
                        tracing::warn!(user_id, message_id, error = %e, "Failed to delete message");
                    }
                }
                Effect::PersistSession => {
                    session.refresh_expiry(Utc::now());
                    if let Err(e) = self.store.save(&session).await {
                        tracing::error!(user_id, error = %e, "Failed to save session");
                        return Err(e.into());
                    }
                }
            }
        }

        match send_failure {
            Some(e) => Err(e.into()),
            None => Ok(DispatchReport {
                sent,
                stage: session.current_stage().cloned(),
            }),
        }
    }
}

/// Entity an event resolved through; counted once the event applies
enum Resolved {
    Command(ResourceRef),
    StageAction(ResourceRef),
    Callback(ResourceRef),
}

fn mint_token() -> String {
    Uuid::new_v4().simple().to_string()
}
