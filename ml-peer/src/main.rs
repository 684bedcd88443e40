use anyhow::Context;
use ml_peer::{AppState, PeerConfig, ScriptRegistry};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = PeerConfig::from_env();
    ml_peer::init_tracing("ml-peer", config.log_json);

    ml_peer::metrics::init_metrics().context("failed to install Prometheus recorder")?;

    let state = AppState::new(ScriptRegistry::with_builtin(), config.events.clone());

    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;

    tracing::info!(address = %config.bind, "ML peer listening");

    ml_peer::serve(listener, state).await?;
    Ok(())
}
