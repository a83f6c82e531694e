use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use vanish_server::blobs::build_blob_store;
use vanish_server::clock::SystemClock;
use vanish_server::config::{generate_config_template, Cli, Config};
use vanish_server::leases::LeaseRegistry;
use vanish_server::lifecycle::{reaper, EngineSettings, LifecycleEngine};
use vanish_server::{db, routes, state};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Handle --generate-config: print template and exit
    if cli.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load(&cli)?;
    config.validate()?;

    // Initialize tracing/logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("vanish_server=info,tower_http=info"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    }

    tracing::info!("Vanish server v{} starting", env!("CARGO_PKG_VERSION"));

    // Lease registry (SQLite) and blob storage
    let db = db::init_db(&config.data_dir)?;
    let registry = LeaseRegistry::new(db);
    let blobs = build_blob_store(&config.storage, &config.data_dir)?;

    let engine = LifecycleEngine::start(
        registry,
        blobs,
        Arc::new(SystemClock),
        EngineSettings::from_config(&config.lifecycle),
    );

    // Backstop for scheduled deletions lost to restarts
    reaper::spawn_reaper(engine.clone(), config.lifecycle.reaper_interval_secs);

    let app_state = state::AppState::new(engine, &config);
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
