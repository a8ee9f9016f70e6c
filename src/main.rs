//! Sluice - multi-tenant HTTP gateway for MongoDB time-series collections

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sluice::{
    config::Args,
    db::{MongoManager, MongoSettings},
    server::{self, AppState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("sluice={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Validate configuration
    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    // Print startup banner
    info!("======================================");
    info!("  Sluice - time-series gateway");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!("API prefix: {}", args.api_prefix);
    info!("MongoDB: {}", args.mongodb_uri);
    info!("Default database: {}", args.mongodb_database);
    info!("Measurement collection: {}", args.mongodb_collection);
    info!("Token collection: {}", args.api_tokens_collection);
    info!(
        "Sweep interval: {}s",
        args.expiration_cleanup_interval_seconds
    );
    info!(
        "Token creation route: {}",
        if args.enable_token_creation_route {
            "ENABLED"
        } else {
            "disabled"
        }
    );
    info!("======================================");

    // Connect to MongoDB; the gateway cannot serve without its store
    let mongo = Arc::new(MongoManager::new(MongoSettings::from_args(&args)));
    if let Err(e) = mongo.connect().await {
        error!("MongoDB connection failed: {}", e);
        std::process::exit(1);
    }

    let state = Arc::new(AppState::new(args, mongo.clone()));

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
    };

    if let Err(e) = server::run(state, shutdown).await {
        error!("HTTP server error: {}", e);
    }

    mongo.close().await;
    info!("Shutdown complete");
    Ok(())
}
