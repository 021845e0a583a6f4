/**
 * DRIFTWATCH KERNEL - Point d'entrée du service de réconciliation
 *
 * RÔLE : Bootstrap : config, stores en mémoire, autorité de configuration,
 * moteur de réconciliation, listener MQTT optionnel et API HTTP.
 *
 * ARCHITECTURE : heartbeats via HTTP et/ou MQTT -> ReconciliationEngine -> stores.
 */

use anyhow::Context;
use driftwatch_kernel::authority::HttpConfigAuthority;
use driftwatch_kernel::config::load_config;
use driftwatch_kernel::health::HealthTracker;
use driftwatch_kernel::http::{build_router, AppState};
use driftwatch_kernel::mqtt::spawn_mqtt_listener;
use driftwatch_kernel::ports::memory::MemoryBackends;
use driftwatch_kernel::{BackoffTracker, Collaborators, ReconciliationEngine};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Ok si .env n'existe pas
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = load_config().await;

    // stores en mémoire + snapshot des instances
    let backends = MemoryBackends::with_snapshot(&cfg.store.snapshot_path);
    if let Err(e) = backends.instances.load().await {
        warn!(error = %e, path = %cfg.store.snapshot_path, "failed to load instance snapshot, starting empty");
    }
    backends.instances.spawn_flusher(cfg.store.flush_interval_secs);

    let authority = HttpConfigAuthority::new(&cfg.authority)
        .context("failed to build configuration authority client")?;

    let health_tracker = HealthTracker::new();
    let engine = Arc::new(
        ReconciliationEngine::new(
            Collaborators {
                instances: backends.instance_store(),
                services: backends.service_directory(),
                drift: backends.drift_ledger(),
                authority: Arc::new(authority),
            },
            Arc::new(BackoffTracker::new()),
            cfg.linkage.default_environments.clone(),
        )
        .with_health(health_tracker.clone()),
    );

    match cfg.mqtt.clone() {
        Some(mqtt) => spawn_mqtt_listener(mqtt, engine.clone(), health_tracker.clone()),
        None => info!("no MQTT section in config, heartbeats accepted over HTTP only"),
    }

    let app = build_router(AppState { engine, health_tracker });

    let listener = TcpListener::bind(&cfg.http.bind)
        .await
        .with_context(|| format!("failed to bind {}", cfg.http.bind))?;
    info!(addr = %cfg.http.bind, "listening");
    axum::serve(listener, app).await.context("HTTP server stopped")?;
    Ok(())
}
