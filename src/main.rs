use std::sync::Arc;
use tracing::{error, info};
use vanatu::api;
use vanatu::config::{VanatuConfig, load_config};
use vanatu::error::VanatuError;
use vanatu::logging::setup_logging;
use vanatu::pipeline::SystemLauncher;
use vanatu::repo::prepare_content_dir;
use vanatu::AppState;

const DEFAULT_CONFIG_PATH: &str = "vanatu.toml";

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn run(config: VanatuConfig) -> Result<(), VanatuError> {
    let checkouts = prepare_content_dir(&config.content_dir).await?;
    info!(
        "Content directory {} holds {} checkout(s): {:?}",
        config.content_dir.display(),
        checkouts.len(),
        checkouts
    );

    let bind_address = config.bind_address.clone();
    let state = Arc::new(AppState::new(config, Arc::new(SystemLauncher))?);
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("Listening on {}", bind_address);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let config_path =
        std::env::var("VANATU_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let config = match load_config(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let log_guard = match setup_logging(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    info!("Using config at {:?}", config_path);

    if let Err(e) = run(config).await {
        error!("{}", e);
        drop(log_guard);
        std::process::exit(1);
    }
}
