pub mod config;
pub mod error;
pub mod http;
pub mod models;
pub mod state;
pub mod telemetry;

use std::sync::Arc;

use anyhow::Context;
use credential_core::{
    AuditTrail, AuditTrailConfig, CredentialOrchestrator, HttpAuditSink, HttpVaultAdapter,
    KeyMaterial, TokenIssuer,
};
use tokio::net::TcpListener;
use tracing::{info, warn};

pub use config::BrokerConfig;
pub use state::AppState;
pub use telemetry::CorrelationId;

pub async fn run(config: BrokerConfig) -> anyhow::Result<()> {
    let state = build_state(&config)?;

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind http listener on {}", config.bind_addr))?;
    let local_addr = listener.local_addr()?;
    info!(%local_addr, "credential broker listening");

    let orchestrator = state.orchestrator.clone();
    let router = http::router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server error")?;

    info!("draining audit queue before exit");
    orchestrator.shutdown().await;
    Ok(())
}

/// Wire the engine together from configuration. Key derivation runs
/// here, once, before the server starts taking requests.
pub fn build_state(config: &BrokerConfig) -> anyhow::Result<AppState> {
    let keys = KeyMaterial::derive(&config.master_secret, &config.kdf_salt)
        .context("failed to derive key material")?;
    let issuer = TokenIssuer::new(keys);

    let vault = HttpVaultAdapter::new(&config.vault_url, &config.vault_token)
        .map_err(|err| anyhow::anyhow!("failed to configure vault adapter: {err}"))?
        .with_timeout(config.vault_fetch_timeout);

    let sink = match config.events_sink() {
        Some((url, token)) => Some(
            HttpAuditSink::new(url, token)
                .map_err(|err| anyhow::anyhow!("failed to configure audit sink: {err}"))?,
        ),
        None => {
            warn!("events sink not configured; audit events go to the local fallback log only");
            None
        }
    };
    let trail = AuditTrail::spawn(
        sink,
        AuditTrailConfig {
            fallback_path: config.audit_fallback_path.clone(),
            ..AuditTrailConfig::default()
        },
    );

    let orchestrator = CredentialOrchestrator::new(Arc::new(vault), issuer, trail)
        .with_fetch_timeout(config.vault_fetch_timeout);
    Ok(AppState::new(Arc::new(orchestrator)))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(?err, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => warn!(?err, "failed to install sigterm handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
