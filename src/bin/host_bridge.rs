//! Headless host bridge binary for stdin/stdout JSON communication.
//!
//! This binary reads `CommandEnvelope` messages as newline-delimited JSON
//! from stdin, dispatches them to the reload manager, and writes
//! `ResponseEnvelope` and `EventEnvelope` messages to stdout.
//!
//! All tracing/diagnostic output goes to stderr so that stdout remains a
//! clean JSON protocol channel.

use reloader::config::ReloaderConfig;
use reloader::host::channel::host_event_channel;
use reloader::host::registry::{EventBadgeSurface, TabRegistry};
use reloader::host::stdio::run_stdio_bridge;
use reloader::platform::SystemClock;
use reloader::remote::RemoteClient;
use reloader::service::{ReloaderService, ServiceDeps};
use reloader::store::RuleStore;
use std::sync::Arc;

const EVENT_CAPACITY: usize = 128;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise tracing to stderr only (stdout is reserved for the JSON
    // protocol).
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("reloader-host starting");

    let config_path = ReloaderConfig::default_config_path();
    let config = ReloaderConfig::load_or_default(&config_path)
        .map_err(|e| anyhow::anyhow!("cannot load {}: {e}", config_path.display()))?;

    let store_path = config.store.resolved_path();
    let store = Arc::new(
        RuleStore::open(store_path.clone())
            .map_err(|e| anyhow::anyhow!("cannot open store {}: {e}", store_path.display()))?,
    );
    let remote = Arc::new(RemoteClient::new(config.remote.clone(), Arc::clone(&store))?);

    let events = host_event_channel(EVENT_CAPACITY);
    let registry = Arc::new(TabRegistry::new(events.clone()));
    let service = ReloaderService::start(
        &config,
        ServiceDeps {
            store,
            tabs: registry.clone(),
            surface: Arc::new(EventBadgeSurface::new(events.clone())),
            remote,
            clock: Arc::new(SystemClock),
        },
    );

    // The shell reports open tabs once connected; startup restore runs
    // alongside so the bridge answers immediately.
    let startup = Arc::clone(&service);
    tokio::spawn(async move { startup.startup().await });

    let result = run_stdio_bridge(Arc::clone(&service), registry, events).await;
    service.shutdown();

    result.map_err(|e| {
        tracing::error!(error = %e, "reloader-host exited with error");
        anyhow::anyhow!("reloader-host failed: {e}")
    })?;

    tracing::info!("reloader-host shut down cleanly");
    Ok(())
}
