use std::sync::Arc;

use anyhow::Context;
use dotenv::dotenv;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::filter::LevelFilter;

use dispatchpay::{
    config::Config,
    db::{DBClient, LedgerStore},
    service::{background_jobs::start_unlock_sweep_job, unlock_sweeper::UnlockSweeper},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::DEBUG)
        .init();

    dotenv().ok();

    let config = Config::init()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .min_connections(config.db_min_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to the database")?;
    tracing::info!(
        "Connected to the database (max {}, min {} connections)",
        config.db_max_connections,
        config.db_min_connections
    );

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    let db_client = DBClient::new(pool);
    let store: Arc<dyn LedgerStore> = Arc::new(db_client.clone());

    let sweeper = UnlockSweeper::new(store, config.unlock_sweep_batch_size);
    let interval_secs = config.unlock_sweep_interval_secs;
    tokio::spawn(async move {
        start_unlock_sweep_job(sweeper, interval_secs).await;
    });

    // pool health
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
        loop {
            interval.tick().await;
            let (size, idle) = db_client.pool_status();
            tracing::debug!("Pool Status - Active: {}, Idle: {}, Total: {}", size - idle as u32, idle, size);
        }
    });

    tracing::info!(
        "Settlement engine running: unlock sweep every {}s, batch size {}",
        config.unlock_sweep_interval_secs,
        config.unlock_sweep_batch_size
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown")?;
    tracing::info!("Shutting down");

    Ok(())
}
