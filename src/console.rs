//! Terminal transport for running a bot schema interactively.
//!
//! Input lines starting with `/` are commands, `cb:<token>` presses an inline
//! button, anything else is plain text. Outbound messages print with their
//! keyboards; inline buttons show the token to type.

use crate::model::{CallbackAnswer, MessageId, OutboundMessage, UserId};
use crate::runtime::{Transport, TransportError, TransportErrorKind};
use crate::state_machine::{InboundEvent, SenderProfile};
use async_trait::async_trait;
use std::fmt::Write as _;
use std::io::Write;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Prefix marking an inline button press
pub const CALLBACK_PREFIX: &str = "cb:";

/// Message IDs shared by both directions so deletes can target either side
#[derive(Debug, Clone, Default)]
pub struct MessageIds(Arc<AtomicI64>);

impl MessageIds {
    pub fn allocate(&self) -> MessageId {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

pub struct ConsoleTransport<W> {
    out: Mutex<W>,
    ids: MessageIds,
}

impl ConsoleTransport<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> ConsoleTransport<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
            ids: MessageIds::default(),
        }
    }

    pub fn message_ids(&self) -> MessageIds {
        self.ids.clone()
    }

    fn emit(&self, text: &str, kind: TransportErrorKind) -> Result<(), TransportError> {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        out.write_all(text.as_bytes())
            .and_then(|()| out.flush())
            .map_err(|e| TransportError::new(kind, e.to_string()))
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Render a message the way the console shows it
pub fn render_message(message_id: MessageId, message: &OutboundMessage) -> String {
    let mut out = format!("[#{message_id}] {}\n", message.text);
    for row in &message.reply_keyboard {
        let buttons: Vec<String> = row.iter().map(|b| format!("[ {} ]", b.text)).collect();
        let _ = writeln!(out, "    {}", buttons.join(" "));
    }
    for row in &message.inline_keyboard {
        let buttons: Vec<String> = row
            .iter()
            .map(|b| {
                let token = b.token.as_deref().unwrap_or("?");
                format!("( {} -> {CALLBACK_PREFIX}{token} )", b.text)
            })
            .collect();
        let _ = writeln!(out, "    {}", buttons.join(" "));
    }
    out
}

#[async_trait]
impl<W: Write + Send> Transport for ConsoleTransport<W> {
    async fn send(
        &self,
        _user_id: UserId,
        message: &OutboundMessage,
    ) -> Result<MessageId, TransportError> {
        let message_id = self.ids.allocate();
        self.emit(
            &render_message(message_id, message),
            TransportErrorKind::Send,
        )?;
        Ok(message_id)
    }

    async fn delete(&self, _user_id: UserId, message_id: MessageId) -> Result<(), TransportError> {
        self.emit(
            &format!("[#{message_id} deleted]\n"),
            TransportErrorKind::Delete,
        )
    }

    async fn answer_callback(
        &self,
        _query_id: &str,
        answer: &CallbackAnswer,
    ) -> Result<(), TransportError> {
        if answer.text.is_empty() {
            return Ok(());
        }
        let label = if answer.show_alert { "alert" } else { "notice" };
        self.emit(
            &format!("({label}: {})\n", answer.text),
            TransportErrorKind::AnswerCallback,
        )
    }
}

/// Turn one input line into an event; blank lines yield nothing
pub fn parse_line(user_id: UserId, ids: &MessageIds, line: &str) -> Option<InboundEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let event = match line.strip_prefix(CALLBACK_PREFIX) {
        Some(token) => {
            let query_id = format!("console-{}", ids.allocate());
            InboundEvent::callback(user_id, query_id, token.trim())
        }
        None => InboundEvent::message(user_id, ids.allocate(), line),
    };
    Some(event.with_sender(SenderProfile {
        first_name: std::env::var("USER").ok(),
        ..SenderProfile::default()
    }))
}

/// Feed lines from `input` into `events` until EOF, a closed channel or
/// `shutdown`
pub fn spawn_reader<R>(
    input: R,
    user_id: UserId,
    ids: MessageIds,
    events: mpsc::Sender<InboundEvent>,
    shutdown: CancellationToken,
) -> JoinHandle<()>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = input.lines();
        loop {
            let line = tokio::select! {
                () = shutdown.cancelled() => break,
                line = lines.next_line() => line,
            };
            match line {
                Ok(Some(line)) => {
                    let Some(event) = parse_line(user_id, &ids, &line) else {
                        continue;
                    };
                    if events.send(event).await.is_err() {
                        tracing::debug!("Event channel closed, console reader stopping");
                        break;
                    }
                }
                Ok(None) => {
                    tracing::info!("Console input closed");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read console input");
                    break;
                }
            }
        }
    })
}
