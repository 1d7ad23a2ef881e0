//! Runtime configuration read from `BOTFLOW_*` environment variables

use crate::model::UserId;
use crate::state_machine::{DEFAULT_SESSION_TTL_SECS, MAX_SESSION_TTL_SECS};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:9000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// JSON bot schema
    pub schema_path: Option<PathBuf>,
    /// SQLite database; `None` keeps sessions in memory
    pub db_path: Option<PathBuf>,
    pub session_ttl_secs: i64,
    /// `None` when the metrics server is disabled
    pub metrics_addr: Option<SocketAddr>,
    pub shutdown_grace: Duration,
    pub console_user_id: UserId,
    pub expiry_sweep_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            schema_path: None,
            db_path: None,
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            metrics_addr: Some(default_metrics_addr()),
            shutdown_grace: Duration::from_secs(5),
            console_user_id: 1,
            expiry_sweep_interval: Duration::from_secs(1),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source; unparsable values fall back
    /// to their defaults with a warning
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let metrics_addr = match var("BOTFLOW_METRICS_ADDR") {
            Some(value) if value.eq_ignore_ascii_case("off") => None,
            Some(value) => Some(parse_or("BOTFLOW_METRICS_ADDR", &value, default_metrics_addr())),
            None => defaults.metrics_addr,
        };

        Self {
            schema_path: var("BOTFLOW_SCHEMA").map(PathBuf::from),
            db_path: var("BOTFLOW_DB_PATH").map(PathBuf::from),
            session_ttl_secs: var("BOTFLOW_SESSION_TTL_SECS")
                .map_or(defaults.session_ttl_secs, |value| session_ttl(&value)),
            metrics_addr,
            shutdown_grace: var("BOTFLOW_SHUTDOWN_GRACE_SECS")
                .map_or(defaults.shutdown_grace, |value| {
                    Duration::from_secs(parse_or("BOTFLOW_SHUTDOWN_GRACE_SECS", &value, 5))
                }),
            console_user_id: var("BOTFLOW_CONSOLE_USER_ID")
                .map_or(defaults.console_user_id, |value| {
                    parse_or("BOTFLOW_CONSOLE_USER_ID", &value, defaults.console_user_id)
                }),
            expiry_sweep_interval: var("BOTFLOW_EXPIRY_SWEEP_SECS")
                .map_or(defaults.expiry_sweep_interval, |value| {
                    Duration::from_secs(parse_or("BOTFLOW_EXPIRY_SWEEP_SECS", &value, 1).max(1))
                }),
        }
    }
}

fn default_metrics_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9000))
}

/// Positive TTL no longer than [`MAX_SESSION_TTL_SECS`]
fn session_ttl(value: &str) -> i64 {
    let ttl = parse_or("BOTFLOW_SESSION_TTL_SECS", value, DEFAULT_SESSION_TTL_SECS);
    if ttl <= 0 {
        tracing::warn!(ttl, "Session TTL must be positive, using the default");
        DEFAULT_SESSION_TTL_SECS
    } else if ttl > MAX_SESSION_TTL_SECS {
        tracing::warn!(ttl, max = MAX_SESSION_TTL_SECS, "Session TTL too long, clamping");
        MAX_SESSION_TTL_SECS
    } else {
        ttl
    }
}

fn parse_or<T: FromStr>(key: &str, value: &str, default: T) -> T {
    value.trim().parse().unwrap_or_else(|_| {
        tracing::warn!(key, value, "Ignoring invalid configuration value");
        default
    })
}
