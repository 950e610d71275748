use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;

use collab_hub::config::ServerConfig;
use collab_hub::core::sweeper::{CleanupSweeper, SweeperSettings};
use collab_hub::core::sync_client::{HttpSyncClient, SyncServiceClient, UnavailableSyncClient};
use collab_hub::core::CollabServer;
use collab_hub::handlers::routes;

#[tokio::main]
async fn main() {
    // Initialize env
    let dotenv_result = dotenvy::dotenv();

    // Initialize logging
    env_logger::init();

    match dotenv_result {
        Ok(path) => info!("Environment variables loaded from {}", path.display()),
        Err(e) => warn!("No .env file loaded: {}", e),
    }

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let settings = match SweeperSettings::from_config(&config) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Configuration: host={}, port={}, connection timeout={:?}, idle after={:?}",
        config.host, config.port, settings.connection_timeout, settings.idle_timeout
    );

    let sync_client: Arc<dyn SyncServiceClient> = match &config.sync_service_url {
        Some(url) => match HttpSyncClient::new(url, config.sync_timeout) {
            Ok(client) => {
                info!("Using sync service at {}", url);
                Arc::new(client)
            }
            Err(e) => {
                error!("Failed to create sync service client: {}", e);
                std::process::exit(1);
            }
        },
        None => {
            warn!("No sync service configured, sync and update requests will fail");
            Arc::new(UnavailableSyncClient)
        }
    };

    // Build the server address
    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Failed to parse server address: {}", e);
            std::process::exit(1);
        }
    };

    let server = Arc::new(CollabServer::new(config, sync_client));
    let sweeper = CleanupSweeper::spawn(Arc::clone(&server), settings);

    let (bound, serving) = match warp::serve(routes(Arc::clone(&server)))
        .try_bind_with_graceful_shutdown(addr, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
        }) {
        Ok(bound) => bound,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    info!("Collaboration hub listening on {}", bound);
    serving.await;

    info!("Shutting down, {} connections open", server.connection_count().await);
    sweeper.shutdown().await;
}
