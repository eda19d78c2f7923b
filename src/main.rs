pub mod api;
pub mod batch;
pub mod config;
pub mod data_structures;
pub mod judge;
pub mod snapshot;
pub mod stock;
pub mod title;
pub mod worker;

use crate::api::AppState;
use crate::batch::ParseJob;
use crate::data_structures::{SharedQuotes, SharedStore, Store};
use crate::stock::{QuoteSource, StockClient};
use anyhow::Context;
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::Mutex;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::CorsLayer;

fn initial_store(app_config: &config::AppConfig) -> anyhow::Result<Store> {
    if let Some(path) = &app_config.data_file {
        if let Some(store) = snapshot::load(path).with_context(|| format!("Failed to load snapshot {}", path.display()))? {
            tracing::info!(infos = store.infos().len(), "Restored store from snapshot");
            return Ok(store);
        }
    }

    match &app_config.seed_file {
        Some(path) => Ok(Store::seed(config::load_seed_infos(path)?)),
        None => Ok(Store::new()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_config = config::AppConfig::load()?;

    // Initialize tracing with node_name in all logs
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let _span = tracing::info_span!("node", name = %app_config.node_name).entered();

    tracing::info!("Starting stockjudge");
    tracing::info!(?app_config.environment, port = app_config.port, "Loaded configuration");

    let shared_store: SharedStore = Arc::new(Mutex::new(initial_store(&app_config)?));
    let stock_client = StockClient::new(app_config.stock.clone()).context("Failed to build stock client")?;
    let shared_quotes: SharedQuotes = Arc::new(Mutex::new(Box::new(stock_client) as Box<dyn QuoteSource>));

    let job = ParseJob {
        store: shared_store.clone(),
        quotes: shared_quotes,
        window_days: app_config.window_days,
        data_file: app_config.data_file.clone(),
    };

    tracing::info!("Spawning parse worker");
    tokio::spawn(worker::run(job.clone(), app_config.clone()));

    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(app_config.api_rate_per_second)
            .burst_size(app_config.api_rate_burst)
            .finish()
            .context("Invalid API rate limit configuration")?,
    );

    let app = api::routes(AppState {
        store: shared_store,
        job,
    })
    .layer(GovernorLayer::new(governor_conf))
    .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], app_config.port));
    tracing::info!(%addr, "Server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
