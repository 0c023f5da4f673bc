use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use settlement::{
    config::{ConfigLoader, ConfigSource, EnvConfigSource, Freshness},
    notification::TracingTransport,
    queue::{InMemoryTaskQueue, TaskQueue},
    rating::start_rating_schedule,
    routes,
    store::{Datastore, InMemoryDatastore, PostgresDatastore},
    Pipeline,
};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "settlement=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        error!(error = %e, "Settlement service stopped");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting settlement service");

    let config = EnvConfigSource::new().load().await?;
    let freshness = match config.reload_ttl {
        Some(ttl) => Freshness::Ttl(ttl),
        None => Freshness::Once,
    };
    let loader = Arc::new(ConfigLoader::new(EnvConfigSource::new(), freshness));

    // Postgres when DATABASE_URL is set, in-memory otherwise
    let (store, queue): (Arc<dyn Datastore>, Arc<dyn TaskQueue>) = match &config.database_url {
        Some(url) => {
            let postgres = Arc::new(PostgresDatastore::connect(url, config.worker.lease_duration).await?);
            postgres.migrate().await?;
            info!("Using PostgreSQL storage");
            let store: Arc<dyn Datastore> = postgres.clone();
            let queue: Arc<dyn TaskQueue> = postgres;
            (store, queue)
        }
        None => {
            let queue = Arc::new(InMemoryTaskQueue::with_lease(config.worker.lease_duration));
            let store = Arc::new(InMemoryDatastore::new(Arc::clone(&queue)));
            info!("Using in-memory storage");
            let store: Arc<dyn Datastore> = store;
            let queue: Arc<dyn TaskQueue> = queue;
            (store, queue)
        }
    };

    let pipeline = Pipeline::new(
        store,
        Arc::clone(&queue),
        &config,
        loader,
        Arc::new(TracingTransport),
    );

    let worker = Arc::clone(&pipeline.worker);
    tokio::spawn(async move { worker.run().await });
    tokio::spawn(start_rating_schedule(queue, config.rating.scan_interval));

    let app = routes::router(pipeline.app_state());

    let listener = tokio::net::TcpListener::bind(&config.http.addr).await?;
    info!(addr = %config.http.addr, "Server running");
    axum::serve(listener, app).await?;
    Ok(())
}
