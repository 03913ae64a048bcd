use anyhow::{Context, Result};
use clap::Parser;
use prepme_api::config::Config;
use prepme_api::{AppState, build_router, cors_layer};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
#[command(version, about = "Mock-interview backend: auth, interviews, feedback and the call bridge")]
struct Cli {
    /// Address to listen on. Overrides BIND_ADDRESS.
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// JSON fixture (`{"users": [...], "interviews": [...]}`) loaded into
    /// the in-memory store at startup.
    #[arg(long)]
    seed: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load application configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    // --- 3. Parse Command-Line Arguments ---
    let args = Cli::parse();

    // --- 4. Wire the services ---
    let state = AppState::from_config(&config, args.seed.as_deref())
        .await
        .context("Failed to initialize services")?;
    tracing::info!(store = ?config.store, "Configuration loaded successfully.");

    // Without ALLOWED_ORIGINS the frontend must be served from the API's origin.
    let mut app = build_router(state);
    if !config.allowed_origins.is_empty() {
        tracing::info!(origins = ?config.allowed_origins, "CORS enabled with credentials");
        app = app.layer(cors_layer(config.allowed_origins.clone()));
    }

    // --- 5. Serve ---
    let addr = args.bind.unwrap_or(config.bind_address);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
