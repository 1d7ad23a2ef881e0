//! Telemetry sinks for the dispatcher
//!
//! `InMemoryMetrics` keeps counters and a request-duration histogram and
//! renders them in the Prometheus text exposition format.

use crate::model::{ResourceRef, UserId};
use crate::runtime::Telemetry;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Metric name prefix
pub const NAMESPACE: &str = "botflow";

/// Upper bounds (seconds) of the request-duration histogram buckets
pub const DURATION_BUCKETS: [f64; 10] = [0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0];

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn unauthenticated_request(&self, _user_id: UserId) {}
    fn user_message_received(&self) {}
    fn bot_message_sent(&self) {}
    fn callback_processed(&self, _handler: &ResourceRef) {}
    fn command_executed(&self, _command: &ResourceRef) {}
    fn stage_reached(&self, _stage: &ResourceRef) {}
    fn stage_action_processed(&self, _action: &ResourceRef) {}
    fn request_duration(&self, _elapsed: Duration) {}
}

/// Emits each observation as a trace event
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn unauthenticated_request(&self, user_id: UserId) {
        tracing::trace!(metric = "unauthenticated_requests", user_id);
    }

    fn user_message_received(&self) {
        tracing::trace!(metric = "user_messages");
    }

    fn bot_message_sent(&self) {
        tracing::trace!(metric = "bot_messages_sent");
    }

    fn callback_processed(&self, handler: &ResourceRef) {
        tracing::trace!(metric = "callbacks_processed", handler = %handler);
    }

    fn command_executed(&self, command: &ResourceRef) {
        tracing::trace!(metric = "commands_executed", command = %command);
    }

    fn stage_reached(&self, stage: &ResourceRef) {
        tracing::trace!(metric = "stages_reached", stage = %stage);
    }

    fn stage_action_processed(&self, action: &ResourceRef) {
        tracing::trace!(metric = "stage_actions_processed", action = %action);
    }

    fn request_duration(&self, elapsed: Duration) {
        tracing::trace!(metric = "request_duration_seconds", seconds = elapsed.as_secs_f64());
    }
}

/// Cumulative histogram over [`DURATION_BUCKETS`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DurationHistogram {
    /// Observations at or below each bucket bound
    pub buckets: [u64; DURATION_BUCKETS.len()],
    pub sum: f64,
    pub count: u64,
}

impl DurationHistogram {
    fn observe(&mut self, seconds: f64) {
        for (bound, bucket) in DURATION_BUCKETS.iter().zip(self.buckets.iter_mut()) {
            if seconds <= *bound {
                *bucket += 1;
            }
        }
        self.sum += seconds;
        self.count += 1;
    }
}

/// Point-in-time copy of every metric
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub unauthenticated_requests: u64,
    pub user_messages: u64,
    pub bot_messages_sent: u64,
    pub callbacks_processed: BTreeMap<String, u64>,
    pub commands_executed: BTreeMap<String, u64>,
    pub stages_reached: BTreeMap<String, u64>,
    pub stage_actions_processed: BTreeMap<String, u64>,
    pub request_duration: DurationHistogram,
}

/// Process-local metrics registry
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    state: Mutex<MetricsSnapshot>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, f: impl FnOnce(&mut MetricsSnapshot)) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Render every metric in the Prometheus text format
    pub fn render_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = String::new();

        write_counter(
            &mut out,
            "unauthenticated_requests_total",
            "Requests from users the authorizer denied",
            snapshot.unauthenticated_requests,
        );
        write_counter(
            &mut out,
            "user_messages_total",
            "Messages received from users",
            snapshot.user_messages,
        );
        write_counter(
            &mut out,
            "bot_messages_sent_total",
            "Messages sent by the bot",
            snapshot.bot_messages_sent,
        );
        write_labelled(
            &mut out,
            "callbacks_processed_total",
            "Inline button presses per callback handler",
            "handler",
            &snapshot.callbacks_processed,
        );
        write_labelled(
            &mut out,
            "commands_executed_total",
            "Commands executed per command",
            "command",
            &snapshot.commands_executed,
        );
        write_labelled(
            &mut out,
            "stages_reached_total",
            "Stage entries per stage",
            "stage",
            &snapshot.stages_reached,
        );
        write_labelled(
            &mut out,
            "stage_actions_processed_total",
            "Stage inputs handled per action",
            "action",
            &snapshot.stage_actions_processed,
        );
        write_histogram(
            &mut out,
            "request_duration_seconds",
            "Time spent handling one event",
            &snapshot.request_duration,
        );
        out
    }
}

fn write_header(out: &mut String, name: &str, help: &str, kind: &str) {
    let _ = writeln!(out, "# HELP {NAMESPACE}_{name} {help}");
    let _ = writeln!(out, "# TYPE {NAMESPACE}_{name} {kind}");
}

fn write_counter(out: &mut String, name: &str, help: &str, value: u64) {
    write_header(out, name, help, "counter");
    let _ = writeln!(out, "{NAMESPACE}_{name} {value}");
}

fn write_labelled(
    out: &mut String,
    name: &str,
    help: &str,
    label: &str,
    values: &BTreeMap<String, u64>,
) {
    write_header(out, name, help, "counter");
    for (key, value) in values {
        let key = escape_label_value(key);
        let _ = writeln!(out, "{NAMESPACE}_{name}{{{label}=\"{key}\"}} {value}");
    }
}

fn write_histogram(out: &mut String, name: &str, help: &str, histogram: &DurationHistogram) {
    write_header(out, name, help, "histogram");
    for (bound, count) in DURATION_BUCKETS.iter().zip(histogram.buckets.iter()) {
        let _ = writeln!(out, "{NAMESPACE}_{name}_bucket{{le=\"{bound}\"}} {count}");
    }
    let _ = writeln!(
        out,
        "{NAMESPACE}_{name}_bucket{{le=\"+Inf\"}} {}",
        histogram.count
    );
    let _ = writeln!(out, "{NAMESPACE}_{name}_sum {}", histogram.sum);
    let _ = writeln!(out, "{NAMESPACE}_{name}_count {}", histogram.count);
}

fn escape_label_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            _ => out.push(ch),
        }
    }
    out
}

fn bump(map: &mut BTreeMap<String, u64>, key: &ResourceRef) {
    *map.entry(key.to_string()).or_default() += 1;
}

impl Telemetry for InMemoryMetrics {
    fn unauthenticated_request(&self, _user_id: UserId) {
        self.update(|m| m.unauthenticated_requests += 1);
    }

    fn user_message_received(&self) {
        self.update(|m| m.user_messages += 1);
    }

    fn bot_message_sent(&self) {
        self.update(|m| m.bot_messages_sent += 1);
    }

    fn callback_processed(&self, handler: &ResourceRef) {
        self.update(|m| bump(&mut m.callbacks_processed, handler));
    }

    fn command_executed(&self, command: &ResourceRef) {
        self.update(|m| bump(&mut m.commands_executed, command));
    }

    fn stage_reached(&self, stage: &ResourceRef) {
        self.update(|m| bump(&mut m.stages_reached, stage));
    }

    fn stage_action_processed(&self, action: &ResourceRef) {
        self.update(|m| bump(&mut m.stage_actions_processed, action));
    }

    fn request_duration(&self, elapsed: Duration) {
        self.update(|m| m.request_duration.observe(elapsed.as_secs_f64()));
    }
}
