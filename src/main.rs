mod backend;
mod config;
mod relay;
mod store;
mod web;

use actix_web::{App, HttpServer, web::Data};
use anyhow::Context;
use dotenv::dotenv;
use log::{info, error};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use backend::{ChatBackend, OllamaClient};
use config::Config;
use relay::Relay;
use store::SessionStore;
use web::{cors, routes};

// App state structure
struct AppState {
    relay: Relay,
    backend: Arc<dyn ChatBackend>,
    store: SessionStore,
    /// Parent of every relay's cancellation token.
    shutdown: CancellationToken,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize environment
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    info!("Starting chat relay");
    let config = Config::from_env();

    let backend: Arc<dyn ChatBackend> = Arc::new(
        OllamaClient::new(config.chat_url.clone(), config.upstream_timeout)
            .context("building inference backend client")?,
    );

    let store = SessionStore::connect(&config.database_url)
        .await
        .with_context(|| format!("opening session store at {}", config.database_url))?;

    let shutdown = CancellationToken::new();
    let app_state = Data::new(AppState {
        relay: Relay::new(backend.clone(), config.upstream_timeout),
        backend,
        store: store.clone(),
        shutdown: shutdown.clone(),
    });

    info!("Listening on {}:{}", config.host, config.port);
    let cors_origins = config.cors_origins.clone();
    let server = HttpServer::new(move || {
        App::new()
            .wrap(cors::build_cors(&cors_origins))
            .app_data(app_state.clone())
            .configure(routes::configure)
    })
    .disable_signals()
    .bind((config.host.as_str(), config.port))?
    .run();

    let handle = server.handle();
    actix_web::rt::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Shutting down, closing live streams");
        shutdown.cancel();
        handle.stop(true).await;
    });

    server.await?;
    store.close().await;
    Ok(())
}
