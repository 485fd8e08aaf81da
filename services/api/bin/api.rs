//! Main Entrypoint for the Knowledge Voice API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing logging.
//! 3. Building the shared services (breakers, retrieval client, recorder).
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use kbvoice_api::{
    config::Config,
    recorder::JsonFileRecorder,
    retrieval::HttpRetrieval,
    router::create_router,
    state::{AppState, Breakers},
};
use kbvoice_core::{Metrics, SessionProfile};
use std::{collections::HashMap, fs, net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl+C");
        return;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

/// A helper function to load prompts from a directory.
fn load_prompts(prompts_path: &std::path::Path) -> anyhow::Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();
    for entry in std::fs::read_dir(prompts_path)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem")?
                .to_string();
            let content = fs::read_to_string(&path)?;
            prompts.insert(prompt_key, content);
        }
    }
    Ok(prompts)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Shared Services ---
    let prompts = load_prompts(&config.prompts_path).with_context(|| {
        format!(
            "Failed to read prompts from {}",
            config.prompts_path.display()
        )
    })?;
    let instructions = prompts
        .get("system_prompt")
        .context("system_prompt.md not found in prompts directory")?
        .clone();
    let voice = SessionProfile::parse_voice(&config.upstream.voice)
        .with_context(|| format!("Unknown voice '{}'", config.upstream.voice))?;
    let profile = SessionProfile::new(instructions, voice);

    let metrics = Arc::new(Metrics::new());
    let breakers = Breakers::from_config(&config.resilience);
    let retrieval = HttpRetrieval::new(
        &config.retrieval,
        config.resilience.retry_policy(),
        breakers.retrieval.clone(),
    )
    .context("Failed to build retrieval client")?;
    let recorder = JsonFileRecorder::new(&config.conversations_dir);

    let app_state = Arc::new(AppState::new(
        &config,
        breakers,
        metrics,
        Arc::new(retrieval),
        Arc::new(recorder),
        profile,
    ));

    // --- 4. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 5. Start Server ---
    info!(
        provider = ?config.upstream.provider,
        environment = %config.environment,
        retrieval_url = %config.retrieval.url,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
