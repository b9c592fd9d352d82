use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use stockorder_api::app::{build_app, AppServices};
use stockorder_infra::{
    Config, InventoryLedger, LockCoordinator, MeilisearchIndex, OrderOrchestrator,
    OrderRepository, PostgresInventoryLedger, PostgresOrderRepository, PostgresProductCatalog,
    RedisLockCoordinator, SearchProjector,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("invalid configuration")?;
    stockorder_observability::init(&config.log_level);

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("failed to connect to postgres")?;

    let locks = RedisLockCoordinator::connect(&config.redis_url, config.lock_ttl)
        .await
        .context("failed to connect to redis")?;

    let index = MeilisearchIndex::new(
        config.meilisearch.url.clone(),
        config.meilisearch.index.clone(),
        config.meilisearch.api_key.clone(),
    );

    let orders = Arc::new(PostgresOrderRepository::new(pool.clone()));
    let (projector, projector_handle) = SearchProjector::spawn(
        index,
        orders.clone(),
        PostgresProductCatalog::new(pool.clone()),
        config.projector_queue,
    );

    let orchestrator = OrderOrchestrator::new(
        Arc::new(locks) as Arc<dyn LockCoordinator>,
        Arc::new(PostgresInventoryLedger::new(pool)) as Arc<dyn InventoryLedger>,
        orders as Arc<dyn OrderRepository>,
    )
    .with_projector(projector);

    let app = build_app(AppServices::new(orchestrator));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // Drain queued index updates.
    projector_handle.shutdown().await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
    }
    tracing::info!("shutdown signal received");
}
