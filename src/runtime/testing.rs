//! Mock collaborators for dispatcher tests
//!
//! These mocks let the pipeline run end to end without a chat platform.

use super::traits::*;
use crate::error::SessionStoreError;
use crate::model::{CallbackAnswer, MessageId, OutboundMessage, ResourceRef, UserId};
use crate::session_store::InMemorySessionStore;
use crate::state_machine::Session;
use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// Mock Transport
// ============================================================================

/// Records every outbound call and hands out sequential message IDs
pub struct MockTransport {
    next_id: AtomicI64,
    /// Sends allowed before every further send fails
    fail_after: Mutex<Option<usize>>,
    send_attempts: AtomicUsize,
    pub sent: Mutex<Vec<(UserId, MessageId, OutboundMessage)>>,
    pub deleted: Mutex<Vec<(UserId, MessageId)>>,
    pub answers: Mutex<Vec<(String, CallbackAnswer)>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            next_id: AtomicI64::new(1000),
            fail_after: Mutex::new(None),
            send_attempts: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            answers: Mutex::new(Vec::new()),
        }
    }
}

#[allow(dead_code)]
impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every send after the first `sends` succeed
    pub fn fail_after(&self, sends: usize) {
        *self.fail_after.lock().unwrap() = Some(sends);
        self.send_attempts.store(0, Ordering::SeqCst);
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, message)| message.text.clone())
            .collect()
    }

    pub fn last_sent(&self) -> Option<OutboundMessage> {
        self.sent.lock().unwrap().last().map(|(_, _, m)| m.clone())
    }

    pub fn deleted_ids(&self) -> Vec<MessageId> {
        self.deleted.lock().unwrap().iter().map(|(_, id)| *id).collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
        self.deleted.lock().unwrap().clear();
        self.answers.lock().unwrap().clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        user_id: UserId,
        message: &OutboundMessage,
    ) -> Result<MessageId, TransportError> {
        let attempt = self.send_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_after.lock().unwrap().is_some_and(|limit| attempt >= limit) {
            return Err(TransportError::send("mock send failure"));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().unwrap().push((user_id, id, message.clone()));
        Ok(id)
    }

    async fn delete(&self, user_id: UserId, message_id: MessageId) -> Result<(), TransportError> {
        self.deleted.lock().unwrap().push((user_id, message_id));
        Ok(())
    }

    async fn answer_callback(
        &self,
        query_id: &str,
        answer: &CallbackAnswer,
    ) -> Result<(), TransportError> {
        self.answers
            .lock()
            .unwrap()
            .push((query_id.to_string(), answer.clone()));
        Ok(())
    }
}

// ============================================================================
// Recording Telemetry
// ============================================================================

/// Records observations as `name` or `name:reference` strings
#[derive(Default)]
pub struct RecordingTelemetry {
    pub events: Mutex<Vec<String>>,
    pub durations: Mutex<Vec<Duration>>,
}

#[allow(dead_code)]
impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    pub fn recorded(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events.lock().unwrap().iter().filter(|e| *e == event).count()
    }
}

impl Telemetry for RecordingTelemetry {
    fn unauthenticated_request(&self, user_id: UserId) {
        self.record(format!("unauthenticated:{user_id}"));
    }

    fn user_message_received(&self) {
        self.record("user_message".to_string());
    }

    fn bot_message_sent(&self) {
        self.record("bot_message".to_string());
    }

    fn callback_processed(&self, handler: &ResourceRef) {
        self.record(format!("callback:{handler}"));
    }

    fn command_executed(&self, command: &ResourceRef) {
        self.record(format!("command:{command}"));
    }

    fn stage_reached(&self, stage: &ResourceRef) {
        self.record(format!("stage:{stage}"));
    }

    fn stage_action_processed(&self, action: &ResourceRef) {
        self.record(format!("stage_action:{action}"));
    }

    fn request_duration(&self, elapsed: Duration) {
        self.durations.lock().unwrap().push(elapsed);
    }
}

// ============================================================================
// Failing Session Store
// ============================================================================

/// Wraps an in-memory store and fails loads and/or saves on demand
#[derive(Default)]
pub struct FailingSessionStore {
    pub inner: InMemorySessionStore,
    fail_get: Mutex<bool>,
    fail_save: Mutex<bool>,
    pub save_attempts: AtomicUsize,
}

impl FailingSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_get(&self, fail: bool) {
        *self.fail_get.lock().unwrap() = fail;
    }

    pub fn fail_save(&self, fail: bool) {
        *self.fail_save.lock().unwrap() = fail;
    }
}

#[async_trait]
impl SessionStore for FailingSessionStore {
    async fn get(&self, user_id: UserId) -> Result<Session, SessionStoreError> {
        if *self.fail_get.lock().unwrap() {
            return Err(SessionStoreError::Backend("mock get failure".to_string()));
        }
        self.inner.get(user_id).await
    }

    async fn save(&self, session: &Session) -> Result<(), SessionStoreError> {
        self.save_attempts.fetch_add(1, Ordering::SeqCst);
        if *self.fail_save.lock().unwrap() {
            return Err(SessionStoreError::Backend("mock save failure".to_string()));
        }
        self.inner.save(session).await
    }

    async fn expire(&self, user_id: UserId) -> Result<(), SessionStoreError> {
        self.inner.expire(user_id).await
    }
}

// ============================================================================
// Dispatcher scenarios
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Whitelist;
    use crate::error::{EngineError, EntityKind};
    use crate::model::{
        Action, CallbackHandler, Command, InitializerError, InlineButton, ReplyButton, Stage,
        StaticStageInitializer, Transit, UserUpdate,
    };
    use crate::registry::EntityRegistry;
    use crate::runtime::Dispatcher;
    use crate::state_machine::{InboundEvent, SenderProfile, UserContext};
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    type TestDispatcher = Dispatcher<Arc<FailingSessionStore>, Arc<MockTransport>>;

    fn action(name: &str, f: fn(&UserContext, &InboundEvent) -> UserUpdate) -> Action {
        Action::new(name, f)
    }

    fn welcome_stage() -> Stage {
        Stage::new("welcome").with_initializer(StaticStageInitializer::new([
            OutboundMessage::text("Welcome!").with_reply_keyboard(vec![vec![
                ReplyButton::new("Continue", "go"),
                ReplyButton::new("Help", "help"),
            ]]),
        ]))
    }

    fn shop_stage() -> Stage {
        Stage::new("shop").with_initializer(StaticStageInitializer::new([
            OutboundMessage::text("Buy something?").with_inline_keyboard(vec![vec![
                InlineButton::new("Pay", "pay"),
                InlineButton::new("Details", "details").retained(),
            ]]),
        ]))
    }

    /// start -> welcome --Continue--> shop --Pay--> done
    fn registry() -> Arc<EntityRegistry> {
        let registry = EntityRegistry::new();
        registry.register_command(Command::new("start", "greet")).unwrap();
        registry.register_command(Command::new("ping", "pong")).unwrap();
        registry.register_stage(welcome_stage()).unwrap();
        registry.register_stage(shop_stage()).unwrap();
        registry
            .register_stage(Stage::new("echo").with_default_action("echo"))
            .unwrap();
        registry.register_stage(Stage::new("done")).unwrap();
        registry
            .register_stage(Stage::new("broken").with_initializer(
                |_user: UserId, _stage: &ResourceRef| -> Result<Vec<OutboundMessage>, InitializerError> {
                    Err(InitializerError("template exploded".to_string()))
                },
            ))
            .unwrap();
        registry
            .register_callback_handler(CallbackHandler::new("pay", "pay"))
            .unwrap();
        registry
            .register_callback_handler(CallbackHandler::new("details", "details"))
            .unwrap();

        registry
            .register_action(action("greet", |ctx, _| {
                UserUpdate::new()
                    .with_message(OutboundMessage::text(format!(
                        "Hi {}",
                        ctx.name.as_deref().unwrap_or("there")
                    )))
                    .with_transit(Transit::to("welcome"))
            }))
            .unwrap();
        registry
            .register_action(action("go", |_, _| {
                UserUpdate::new().with_transit(Transit::clean("shop"))
            }))
            .unwrap();
        registry
            .register_action(action("help", |_, _| {
                UserUpdate::new().with_message(OutboundMessage::text("Press Continue"))
            }))
            .unwrap();
        registry
            .register_action(action("pay", |_, _| {
                UserUpdate::new()
                    .with_callback_answer(crate::model::CallbackAnswer::new("Paid"))
                    .with_transit(Transit::to("done"))
            }))
            .unwrap();
        registry
            .register_action(action("details", |_, _| {
                UserUpdate::new().with_message(OutboundMessage::text("Details"))
            }))
            .unwrap();
        registry
            .register_action(action("pong", |_, _| {
                UserUpdate::new().with_message(OutboundMessage::text("pong"))
            }))
            .unwrap();
        registry
            .register_action(action("echo", |_, event| {
                UserUpdate::new()
                    .with_message(OutboundMessage::text(event.text().unwrap_or_default()))
            }))
            .unwrap();
        registry
            .register_action(action("to_broken", |_, _| {
                UserUpdate::new().with_transit(Transit::to("broken"))
            }))
            .unwrap();
        registry
            .register_command(Command::new("break", "to_broken"))
            .unwrap();
        registry
            .register_command(Command::new("echo", "to_echo"))
            .unwrap();
        registry
            .register_action(action("to_echo", |_, _| {
                UserUpdate::new().with_transit(Transit::to("echo"))
            }))
            .unwrap();
        Arc::new(registry)
    }

    struct Harness {
        dispatcher: TestDispatcher,
        store: Arc<FailingSessionStore>,
        transport: Arc<MockTransport>,
        telemetry: Arc<RecordingTelemetry>,
    }

    fn harness() -> Harness {
        let store = Arc::new(FailingSessionStore::new());
        let transport = Arc::new(MockTransport::new());
        let telemetry = Arc::new(RecordingTelemetry::new());
        let dispatcher = Dispatcher::new(registry(), Arc::clone(&store), Arc::clone(&transport))
            .unwrap()
            .with_telemetry(telemetry.clone());
        Harness {
            dispatcher,
            store,
            transport,
            telemetry,
        }
    }

    async fn session(h: &Harness, user_id: UserId) -> Session {
        h.store.inner.get(user_id).await.unwrap()
    }

    fn inline_tokens(message: &OutboundMessage) -> Vec<String> {
        message
            .inline_buttons()
            .map(|b| b.token.clone().unwrap())
            .collect()
    }

    #[test]
    fn test_missing_start_command_is_fatal() {
        let registry = Arc::new(EntityRegistry::new());
        let result = Dispatcher::new(registry, InMemorySessionStore::new(), MockTransport::new());
        assert!(matches!(
            result,
            Err(EngineError::NotFound {
                kind: EntityKind::Command,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_start_creates_session_and_enters_welcome() {
        let h = harness();
        let event = InboundEvent::message(1, 10, "/start").with_sender(SenderProfile {
            first_name: Some("Ann".to_string()),
            ..SenderProfile::default()
        });

        let report = h.dispatcher.dispatch(event).await.unwrap();

        assert_eq!(report.stage.as_ref().map(ResourceRef::as_str), Some("welcome"));
        assert_eq!(h.transport.sent_texts(), vec!["Hi Ann", "Welcome!"]);
        let session = session(&h, 1).await;
        assert_eq!(session.context.name.as_deref(), Some("Ann"));
        assert_eq!(session.pending_inputs.len(), 2);
        assert_eq!(session.pending_input("Continue").unwrap().as_str(), "go");
        // incoming message plus both replies
        assert_eq!(session.stage_messages, vec![10, report.sent[0], report.sent[1]]);
        assert_eq!(h.telemetry.count("command:start"), 1);
        assert_eq!(h.telemetry.count("stage:welcome"), 1);
        assert_eq!(h.telemetry.count("bot_message"), 2);
    }

    #[tokio::test]
    async fn test_plain_text_without_stage_runs_start() {
        let h = harness();
        let report = h
            .dispatcher
            .dispatch(InboundEvent::message(1, 10, "hello"))
            .await
            .unwrap();
        assert_eq!(report.stage.as_ref().map(ResourceRef::as_str), Some("welcome"));
    }

    #[tokio::test]
    async fn test_reply_button_resolves_through_pending_inputs() {
        let h = harness();
        h.dispatcher.dispatch(InboundEvent::message(1, 10, "/start")).await.unwrap();
        let tracked = session(&h, 1).await.stage_messages;

        let report = h
            .dispatcher
            .dispatch(InboundEvent::message(1, 11, "Continue"))
            .await
            .unwrap();

        assert_eq!(report.stage.as_ref().map(ResourceRef::as_str), Some("shop"));
        // clean transit removes every tracked message including the user's own
        let mut expected = tracked;
        expected.push(11);
        assert_eq!(h.transport.deleted_ids(), expected);
        let session = session(&h, 1).await;
        assert!(session.pending_inputs.is_empty());
        assert_eq!(session.stage_messages, report.sent);
        assert_eq!(h.telemetry.count("stage_action:go"), 1);
    }

    #[tokio::test]
    async fn test_staying_in_stage_redisplays_it() {
        let h = harness();
        h.dispatcher.dispatch(InboundEvent::message(1, 10, "/start")).await.unwrap();
        h.transport.clear();

        h.dispatcher
            .dispatch(InboundEvent::message(1, 11, "Help"))
            .await
            .unwrap();

        assert_eq!(h.transport.sent_texts(), vec!["Press Continue", "Welcome!"]);
        assert!(session(&h, 1).await.pending_input("Continue").is_some());
    }

    #[tokio::test]
    async fn test_stage_without_redisplay_is_not_reshown() {
        let h = harness();
        h.dispatcher
            .registry()
            .override_stage(welcome_stage().redisplay(false), &[]);
        h.dispatcher.dispatch(InboundEvent::message(1, 10, "/start")).await.unwrap();
        h.transport.clear();

        h.dispatcher
            .dispatch(InboundEvent::message(1, 11, "Help"))
            .await
            .unwrap();
        assert_eq!(h.transport.sent_texts(), vec!["Press Continue"]);
    }

    #[tokio::test]
    async fn test_inline_button_resolves_once() {
        let h = harness();
        h.dispatcher.dispatch(InboundEvent::message(1, 10, "/start")).await.unwrap();
        h.dispatcher.dispatch(InboundEvent::message(1, 11, "Continue")).await.unwrap();

        let shop_message = h.transport.last_sent().unwrap();
        let tokens = inline_tokens(&shop_message);
        assert_eq!(tokens.len(), 2);
        assert_ne!(tokens[0], tokens[1]);

        let report = h
            .dispatcher
            .dispatch(InboundEvent::callback(1, "q1", tokens[0].clone()))
            .await
            .unwrap();
        assert_eq!(report.stage.as_ref().map(ResourceRef::as_str), Some("done"));
        assert_eq!(
            h.transport.answers.lock().unwrap().clone(),
            vec![("q1".to_string(), crate::model::CallbackAnswer::new("Paid"))]
        );
        assert_eq!(h.telemetry.count("callback:pay"), 1);

        let err = h
            .dispatcher
            .dispatch(InboundEvent::callback(1, "q2", tokens[0].clone()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::NotFound {
                kind: EntityKind::CallbackToken,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_retained_button_resolves_repeatedly() {
        let h = harness();
        h.dispatcher
            .registry()
            .override_stage(shop_stage().redisplay(false), &[]);
        h.dispatcher.dispatch(InboundEvent::message(1, 10, "/start")).await.unwrap();
        h.dispatcher.dispatch(InboundEvent::message(1, 11, "Continue")).await.unwrap();
        let details = inline_tokens(&h.transport.last_sent().unwrap())[1].clone();

        for query in ["q1", "q2", "q3"] {
            h.dispatcher
                .dispatch(InboundEvent::callback(1, query, details.clone()))
                .await
                .unwrap();
        }
        assert_eq!(h.telemetry.count("callback:details"), 3);
    }

    #[tokio::test]
    async fn test_redisplayed_keyboard_keeps_tokens_bounded() {
        let h = harness();
        h.dispatcher.registry().override_stage(
            Stage::new("echo")
                .with_default_action("echo")
                .with_initializer(StaticStageInitializer::new([OutboundMessage::text("Menu")
                    .with_inline_keyboard(vec![vec![
                        InlineButton::new("Pay", "pay"),
                        InlineButton::new("Details", "details").retained(),
                    ]])])),
            &[],
        );
        h.dispatcher.dispatch(InboundEvent::message(1, 10, "/echo")).await.unwrap();
        let first = inline_tokens(&h.transport.last_sent().unwrap());

        for id in 11..61 {
            h.dispatcher
                .dispatch(InboundEvent::message(1, id, "again"))
                .await
                .unwrap();
        }

        let session = session(&h, 1).await;
        assert_eq!(session.pending_callbacks.len(), 2);
        let latest = inline_tokens(&h.transport.last_sent().unwrap());
        assert!(latest.iter().all(|t| session.pending_callbacks.contains_key(t)));
        assert!(h
            .dispatcher
            .dispatch(InboundEvent::callback(1, "stale", first[1].clone()))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_unknown_text_in_closed_stage_is_unrecognized() {
        let h = harness();
        h.dispatcher.dispatch(InboundEvent::message(1, 10, "/start")).await.unwrap();
        let before = session(&h, 1).await;

        let err = h
            .dispatcher
            .dispatch(InboundEvent::message(1, 11, "what?"))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::UnrecognizedInput { ref stage } if stage.as_str() == "welcome"));
        assert_eq!(session(&h, 1).await, before);
    }

    #[tokio::test]
    async fn test_free_text_goes_to_default_action() {
        let h = harness();
        h.dispatcher.dispatch(InboundEvent::message(1, 10, "/echo")).await.unwrap();
        h.transport.clear();

        h.dispatcher
            .dispatch(InboundEvent::message(1, 11, "anything at all"))
            .await
            .unwrap();
        assert_eq!(h.transport.sent_texts(), vec!["anything at all"]);
    }

    #[tokio::test]
    async fn test_command_wins_over_pending_input() {
        let h = harness();
        h.dispatcher.dispatch(InboundEvent::message(1, 10, "/start")).await.unwrap();
        h.transport.clear();

        h.dispatcher.dispatch(InboundEvent::message(1, 11, "/ping")).await.unwrap();
        assert_eq!(h.transport.sent_texts()[0], "pong");
    }

    #[tokio::test]
    async fn test_unauthorized_user_is_dropped_silently() {
        let h = harness();
        let dispatcher = h.dispatcher.with_authorizer(Arc::new(Whitelist::new([1])));

        let err = dispatcher
            .dispatch(InboundEvent::message(2, 10, "/start"))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Unauthorized(2)));
        assert!(h.transport.sent_texts().is_empty());
        assert!(h.store.inner.get(2).await.is_err());
        assert_eq!(h.telemetry.count("unauthenticated:2"), 1);
    }

    #[tokio::test]
    async fn test_initializer_failure_aborts_unpersisted() {
        let h = harness();
        h.dispatcher.dispatch(InboundEvent::message(1, 10, "/start")).await.unwrap();
        let before = session(&h, 1).await;
        h.transport.clear();

        let err = h
            .dispatcher
            .dispatch(InboundEvent::message(1, 11, "/break"))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::StageInitializer { .. }));
        assert!(h.transport.sent_texts().is_empty());
        assert_eq!(session(&h, 1).await, before);
        assert_eq!(h.telemetry.count("command:break"), 0);
        assert_eq!(h.telemetry.count("command:start"), 1);
    }

    #[tokio::test]
    async fn test_failed_stage_action_is_not_counted() {
        let h = harness();
        h.dispatcher.dispatch(InboundEvent::message(1, 10, "/start")).await.unwrap();
        h.dispatcher
            .registry()
            .override_action(
                action("help", |_, _| UserUpdate::new().with_transit(Transit::to("nowhere"))),
                &[1],
            );

        let err = h
            .dispatcher
            .dispatch(InboundEvent::message(1, 11, "Help"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EngineError::NotFound {
                kind: EntityKind::Stage,
                ..
            }
        ));
        assert_eq!(h.telemetry.count("stage_action:help"), 0);
    }

    #[tokio::test]
    async fn test_send_failure_still_persists() {
        let h = harness();
        h.transport.fail_after(1);

        let err = h
            .dispatcher
            .dispatch(InboundEvent::message(1, 10, "/start"))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::TransportFailure(_)));
        assert_eq!(h.transport.sent_texts(), vec!["Hi there"]);
        let session = session(&h, 1).await;
        assert_eq!(session.current_stage().map(ResourceRef::as_str), Some("welcome"));
        assert_eq!(session.stage_messages.len(), 2);
    }

    #[tokio::test]
    async fn test_save_failure_is_reported() {
        let h = harness();
        h.store.fail_save(true);

        let err = h
            .dispatcher
            .dispatch(InboundEvent::message(1, 10, "/start"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PersistenceFailure(_)));
        assert_eq!(h.store.save_attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_load_failure_aborts() {
        let h = harness();
        h.store.fail_get(true);

        let err = h
            .dispatcher
            .dispatch(InboundEvent::message(1, 10, "/start"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PersistenceFailure(_)));
        assert_eq!(h.store.save_attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_per_user_override_in_dispatch() {
        let h = harness();
        h.dispatcher
            .registry()
            .override_action(action("greet", |_, _| {
                UserUpdate::new().with_message(OutboundMessage::text("VIP"))
            }), &[7]);

        h.dispatcher.dispatch(InboundEvent::message(7, 1, "/start")).await.unwrap();
        h.dispatcher.dispatch(InboundEvent::message(8, 1, "/start")).await.unwrap();

        let sent = h.transport.sent.lock().unwrap().clone();
        let for_user = |user: UserId| -> Vec<String> {
            sent.iter()
                .filter(|(u, _, _)| *u == user)
                .map(|(_, _, m)| m.text.clone())
                .collect()
        };
        assert_eq!(for_user(7), vec!["VIP"]);
        assert_eq!(for_user(8), vec!["Hi there", "Welcome!"]);
    }

    #[tokio::test]
    async fn test_concurrent_presses_resolve_at_most_once() {
        let h = harness();
        h.dispatcher.dispatch(InboundEvent::message(1, 10, "/start")).await.unwrap();
        h.dispatcher.dispatch(InboundEvent::message(1, 11, "Continue")).await.unwrap();
        let pay = inline_tokens(&h.transport.last_sent().unwrap())[0].clone();

        let dispatcher = Arc::new(h.dispatcher);
        let presses = (0..5).map(|i| {
            let dispatcher = Arc::clone(&dispatcher);
            let token = pay.clone();
            tokio::spawn(async move {
                dispatcher
                    .dispatch(InboundEvent::callback(1, format!("q{i}"), token))
                    .await
                    .is_ok()
            })
        });
        let mut succeeded = 0;
        for press in presses.collect::<Vec<_>>() {
            if press.await.unwrap() {
                succeeded += 1;
            }
        }
        assert_eq!(succeeded, 1);
        assert_eq!(h.telemetry.count("callback:pay"), 1);
    }

    #[tokio::test]
    async fn test_run_loop_drains_and_stops_on_shutdown() {
        let h = harness();
        let dispatcher = Arc::new(h.dispatcher);
        let (tx, rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let loop_handle = tokio::spawn(Arc::clone(&dispatcher).run(rx, shutdown.clone()));

        tx.send(InboundEvent::message(1, 10, "/start")).await.unwrap();
        tx.send(InboundEvent::message(2, 10, "/start")).await.unwrap();
        drop(tx);
        loop_handle.await.unwrap();

        assert!(h.store.inner.get(1).await.is_ok());
        assert!(h.store.inner.get(2).await.is_ok());

        let (_tx, rx) = mpsc::channel::<InboundEvent>(1);
        let stopped = tokio::spawn(dispatcher.run(rx, shutdown.clone()));
        shutdown.cancel();
        stopped.await.unwrap();
    }
}
