use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vittcott_backend::{
    api::{start_server, ApiState},
    arbiter::QuoteArbiter,
    assistant::{AssistantOptions, FinanceAssistant},
    config::Settings,
    gemini::GeminiBackend,
    providers::build_http_client,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Missing mandatory configuration is fatal here, never a 500 later.
    let settings = Settings::from_env().map_err(|e| {
        error!("Startup aborted: {}", e);
        e
    })?;

    info!("🚀 Vittcott backend - API Server");
    info!("📍 Port: {}", settings.port);
    info!(
        race_mode = settings.quotes.race_mode,
        primary_timeout_ms = settings.quotes.primary_timeout.as_millis() as u64,
        fallback_timeout_ms = settings.quotes.fallback_timeout.as_millis() as u64,
        default_currency = %settings.quotes.default_currency,
        model = %settings.assistant.model,
        "Configuration loaded"
    );

    // One pooled client for the whole process
    let client = build_http_client()?;

    let arbiter = Arc::new(QuoteArbiter::from_settings(client.clone(), &settings.quotes));
    let backend = Arc::new(GeminiBackend::new(client, &settings.assistant));
    let assistant = Arc::new(FinanceAssistant::new(
        backend,
        AssistantOptions::from(&settings.assistant),
    ));

    info!("✅ Quote arbiter and assistant initialized");
    info!("📡 Starting API server...");

    start_server(ApiState { arbiter, assistant }, settings.port, shutdown_signal()).await?;

    info!("🧹 Server stopped, HTTP client released");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
