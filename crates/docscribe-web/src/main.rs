use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use docscribe_core::{Config, LlmBackend, OpenAiBackend};
use docscribe_web::AppState;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let file_config = docscribe_core::config_file::load_config();
    let config = Config::from_config_file(&file_config).with_env_overrides();

    let backend: Option<Arc<dyn LlmBackend>> = match OpenAiBackend::from_config(&config) {
        Ok(backend) => Some(Arc::new(backend)),
        Err(e) => {
            tracing::warn!(error = %e, "no server-side LLM backend; uploads must supply an API key");
            None
        }
    };

    tracing::info!(
        api_base = %config.api_base,
        model = %config.model,
        requests_per_minute = config.requests_per_minute,
        "configuration loaded"
    );

    let state = Arc::new(AppState::new(config, backend));
    let app = docscribe_web::app(state);

    let addr: SocketAddr = std::env::var("DOCSCRIBE_ADDR")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.parse())
        .transpose()
        .context("Invalid DOCSCRIBE_ADDR")?
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 5001)));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;

    Ok(())
}
