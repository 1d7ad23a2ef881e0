//! botflow - run a bot schema against the console transport

use botflow::api::{self, AppState};
use botflow::config::EngineConfig;
use botflow::console::{self, ConsoleTransport};
use botflow::db::SqliteSessionStore;
use botflow::runtime::{Dispatcher, SessionStore};
use botflow::session_store::InMemorySessionStore;
use botflow::telemetry::InMemoryMetrics;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const EVENT_QUEUE_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so they don't interleave with console output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "botflow=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = EngineConfig::from_env();
    let Some(schema_path) = config.schema_path.clone() else {
        return Err("BOTFLOW_SCHEMA must point to a bot schema".into());
    };
    let bootstrap = botflow::bootstrap::from_file(&schema_path)?;

    let shutdown = CancellationToken::new();
    let store: Arc<dyn SessionStore> = match &config.db_path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            tracing::info!(path = %path.display(), "Opening session database");
            Arc::new(SqliteSessionStore::open(path)?)
        }
        None => {
            tracing::info!("Keeping sessions in memory");
            let store = InMemorySessionStore::new();
            store.spawn_expiry_sweeper(config.expiry_sweep_interval, shutdown.clone());
            Arc::new(store)
        }
    };

    let metrics = Arc::new(InMemoryMetrics::new());
    let transport = Arc::new(ConsoleTransport::stdout());
    let ids = transport.message_ids();

    let dispatcher = Dispatcher::new(Arc::new(bootstrap.registry), store, transport)?
        .with_authorizer(bootstrap.authorizer)
        .with_telemetry(metrics.clone())
        .with_session_ttl(config.session_ttl_secs);

    let metrics_server = match config.metrics_addr {
        Some(addr) => {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            Some(tokio::spawn(api::serve(
                listener,
                AppState::new(metrics),
                shutdown.clone(),
                config.shutdown_grace,
            )))
        }
        None => None,
    };

    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let reader = console::spawn_reader(
        tokio::io::BufReader::new(tokio::io::stdin()),
        config.console_user_id,
        ids,
        events_tx,
        shutdown.clone(),
    );

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received");
            }
            shutdown.cancel();
        });
    }

    tracing::info!(
        schema = %schema_path.display(),
        user_id = config.console_user_id,
        "botflow ready; type /start"
    );
    Arc::new(dispatcher).run(events_rx, shutdown.clone()).await;

    // Input EOF ends the dispatch loop without a signal
    shutdown.cancel();
    reader.abort();
    if let Some(server) = metrics_server {
        server.await??;
    }
    Ok(())
}
