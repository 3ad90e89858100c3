mod config;
mod schema;
mod storage;

use std::sync::Arc;

use anyhow::Result;
use sync_server::{OpenAuthorization, Route, SyncEngine};
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::EngineConfig;
use storage::InMemoryStorage;

#[tokio::main]
async fn main() -> Result<()> {
    let config = EngineConfig::parse_config();

    let subscriber = tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env());
    if config.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let registry = schema::demo_schema();
    let storage: Arc<dyn sync_server::EntityStorage> = Arc::new(InMemoryStorage::new());

    let mut engine = SyncEngine::new(registry, storage);
    for resource in ["orgs", "users", "posts"] {
        engine = engine.with_route(Route::new(resource, Arc::new(OpenAuthorization)));
    }
    let engine = Arc::new(engine);

    let app = sync_server::routes(engine);

    info!(addr = %config.bind_addr, "starting sync engine");
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
