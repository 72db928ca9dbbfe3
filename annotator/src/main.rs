use std::sync::Arc;

use annotator::actors::HttpProbe;
use annotator::remote_api::HttpRemoteApi;
use annotator::{SyncConfig, SyncEngine};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn load_env_file() {
    let cwd = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            tracing::warn!(error = %e, "Could not determine current directory for .env lookup");
            return;
        }
    };

    let mut current = cwd;
    loop {
        let candidate = current.join(".env");
        if candidate.exists() {
            if let Err(e) = dotenvy::from_path(&candidate) {
                tracing::warn!(path = %candidate.display(), error = %e, "Failed to load .env file");
            } else {
                tracing::info!(path = %candidate.display(), "Loaded environment from .env");
            }
            return;
        }
        if !current.pop() {
            break;
        }
    }
    tracing::debug!("No .env file found");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "annotator=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    load_env_file();
    let config = SyncConfig::from_env()?;
    tracing::info!(
        database_path = %config.database_path.display(),
        api_base_url = %config.api_base_url,
        user_id = %config.user_id,
        "annotator starting"
    );

    let remote_api = HttpRemoteApi::new(
        config.api_base_url.clone(),
        config.api_token.clone(),
        config.http_timeout,
    )
    .map_err(|e| anyhow::anyhow!("failed to build remote API client: {e}"))?;
    let probe = HttpProbe::new(config.health_url.clone(), config.http_timeout)
        .map_err(|e| anyhow::anyhow!("failed to build connectivity probe: {e}"))?;

    let engine = SyncEngine::start(config, Arc::new(remote_api), Arc::new(probe)).await?;

    let pending = engine.pending_count().await;
    tracing::info!(pending, "Pending operations restored from local store");
    if pending > 0 {
        engine.drain();
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    engine.shutdown().await;
    Ok(())
}
