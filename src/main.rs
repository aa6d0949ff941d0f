use dotenvy::dotenv;

mod classify;
mod collab;
mod config;
mod db;
mod engine;
mod error;
mod metrics;
mod model;
mod scheduler;

use config::Config;
use db::init_db;

use tracing::info;
use tracing_appender::rolling;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = Config::from_env();

    // Rolling daily log
    let file_appender = rolling::daily(&config.log_dir, "pointage.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .pretty()
        .init();

    info!("Attendance engine starting...");

    let pool = init_db(&config.database_url).await;

    let escalation_pool = pool.clone();
    let escalation_config = config.clone();
    tokio::spawn(async move {
        scheduler::escalation_loop(escalation_pool, escalation_config).await;
    });

    let absence_pool = pool.clone();
    let absence_config = config.clone();
    tokio::spawn(async move {
        scheduler::absence_loop(absence_pool, absence_config).await;
    });

    info!(
        escalation_interval_secs = config.escalation_interval_secs,
        absence_detection_hour = config.absence_detection_hour,
        "Schedulers running, waiting for shutdown signal"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping");
    Ok(())
}
