//! Runs the outbox dispatcher against PostgreSQL until interrupted.
//!
//! The dispatcher feeds the low-stock monitor. Further subscribers (realtime
//! fan-out, notifications) attach with `with_subscriber`.

use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use tallyline_infra::outbox::OutboxStore;
use tallyline_infra::postgres::ensure_schema;
use tallyline_infra::read_model::InMemoryTenantStore;
use tallyline_infra::{
    AppConfig, BalanceProjector, LedgerStores, LowStockMonitor, OutboxDispatcher, PgLedger,
    PgStockCatalog, PgTx, StockLevel, StockLevelKey,
};
use tallyline_observability::LogFormat;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env();
    let log_format = config.as_ref().map_or("json", |c| c.log_format.as_str());
    tallyline_observability::tracing::init(LogFormat::from_name(log_format), "info");
    let config = config.context("reading configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await
        .context("connecting to postgres")?;
    ensure_schema(&pool).await.context("preparing schema")?;

    let ledger = Arc::new(PgLedger::new(pool.clone()));
    let catalog = Arc::new(PgStockCatalog::new(pool));
    let projector = BalanceProjector::new(
        ledger.clone(),
        LedgerStores::from_backend(ledger.clone()),
        catalog.clone(),
    );

    let levels = Arc::new(InMemoryTenantStore::<StockLevelKey, StockLevel>::new());

    let outbox: Arc<dyn OutboxStore<PgTx>> = ledger.clone();
    let dispatcher = OutboxDispatcher::new(ledger, outbox)
        .with_subscriber(Arc::new(LowStockMonitor::new(projector, catalog, levels)));

    let handle = dispatcher.spawn(config.dispatcher());
    info!(name = %config.outbox_worker_name, "outbox worker started");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown requested");

    let stats = handle.stats();
    handle.shutdown().await;
    info!(
        batches = stats.batches,
        delivered = stats.delivered,
        failed = stats.failed,
        batch_errors = stats.batch_errors,
        "outbox worker stopped"
    );
    Ok(())
}
