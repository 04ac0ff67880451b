use std::{net::SocketAddr, sync::Arc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod aws_clients;
mod cache;
mod catalog;
mod config;
mod domain;
mod errors;
mod handlers;
mod images;
mod memes;
mod models;
mod origin;
mod repositories;
mod routes;
mod startup;
mod votes;

#[cfg(test)]
mod testing;

use crate::aws_clients::{create_dynamodb_client, create_sdk_config};
use crate::catalog::TemplateCatalog;
use crate::config::{CacheTtls, Config};
use crate::domain::{ImageOrigin, KeyValueCache, MemeRepository};
use crate::errors::AppError;
use crate::images::ImageResolver;
use crate::memes::MemeService;
use crate::origin::MemegenClient;
use crate::repositories::{DynamoDbMemeRepository, TableNames};
use crate::votes::VoteLedger;

/// AppState holds the components shared by every request handler.
pub struct AppState {
    pub memes: MemeService,
    pub images: ImageResolver,
    pub catalog: TemplateCatalog,
    pub votes: VoteLedger,
}

impl AppState {
    /// Wires the components over one set of collaborator handles.
    pub fn new(
        repo: Arc<dyn MemeRepository>,
        cache: Arc<dyn KeyValueCache>,
        origin: Arc<dyn ImageOrigin>,
        ttls: CacheTtls,
        admin_key: Option<String>,
    ) -> Self {
        let images = ImageResolver::new(cache.clone(), origin.clone(), repo.clone(), ttls.image);
        Self {
            memes: MemeService::new(repo.clone(), origin.clone(), images.clone(), admin_key),
            catalog: TemplateCatalog::new(cache.clone(), origin, ttls.catalog),
            votes: VoteLedger::new(cache, repo, ttls.vote),
            images,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Initialize tracing (logging)
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "meme_cache_service=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = Config::load()?;

    // --- Collaborator handles ---
    let sdk_config = create_sdk_config(&config).await?;
    let db_client = create_dynamodb_client(&sdk_config);
    let tables = TableNames {
        memes: config.memes_table.clone(),
        comments: config.comments_table.clone(),
        counters: config.counters_table.clone(),
    };
    startup::init_resources(&db_client, &tables).await?;

    let cache = startup::connect_cache(&config).await?;
    let origin = MemegenClient::new(&config.memegen_url, config.origin_timeout)?;
    let repo = DynamoDbMemeRepository::new(db_client, tables);

    // --- Application State ---
    let state = Arc::new(AppState::new(
        Arc::new(repo),
        Arc::new(cache),
        Arc::new(origin),
        config.ttls,
        config.admin_key.clone(),
    ));

    let app = routes::create_router(state);

    // --- Server Startup ---
    tracing::info!("Server listening on http://{}", config.bind_address);
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped, releasing connections");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
