use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use milestone_core::PartitionCatalog;
use milestone_worker::{
    BackfillConfig, BackfillRequest, BackfillRunner, LiveConfig, LiveRunner, PgStore, RetryConfig,
    Stores, WorkerConfig, WorkerMode,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "milestone_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = ?e, "Worker failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    let config = WorkerConfig::from_env()?;
    let catalog = Arc::new(PartitionCatalog::new(config.load_catalog()?)?);
    tracing::info!(
        mode = ?config.mode,
        worker_id = %config.worker_id,
        networks = catalog.networks().len(),
        "Milestone worker starting",
    );

    let pool = milestone_db::create_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    milestone_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    tracing::info!("Database connection established");

    milestone_db::run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Database migrations applied");

    let stores = Stores::from_shared(Arc::new(PgStore::new(pool.clone())));
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown signal received");
                cancel.cancel();
            }
        });
    }

    let code = match config.mode {
        WorkerMode::Live => {
            let tick_minutes = catalog
                .networks()
                .iter()
                .map(|n| n.interval_minutes)
                .min()
                .unwrap_or(5);
            let live_config = LiveConfig {
                concurrency: config.live_concurrency,
                lease_ttl: config.lease_ttl,
                holder: config.worker_id.clone(),
                gap_alert_ticks: config.gap_alert_ticks,
                tick_interval: Duration::from_secs(u64::from(tick_minutes) * 60),
                history_start: config.history_start,
                retry: RetryConfig::default(),
            };
            let mut runner = LiveRunner::new(&catalog, stores, live_config)?;
            runner.run(cancel).await;
            ExitCode::SUCCESS
        }
        WorkerMode::Backfill => {
            let (Some(start), Some(end)) = (config.backfill_start, config.backfill_end) else {
                anyhow::bail!("backfill mode requires BACKFILL_START and BACKFILL_END");
            };
            let backfill_config = BackfillConfig {
                concurrency: config.backfill_concurrency,
                lease_ttl: config.lease_ttl,
                holder: config.worker_id.clone(),
                retry: RetryConfig::default(),
            };
            let runner = BackfillRunner::new(Arc::clone(&catalog), stores, backfill_config);
            let report = runner.run(&BackfillRequest::new(start, end), &cancel).await?;
            tracing::info!(report = %serde_json::to_string(&report)?, "Backfill report");
            if report.is_success() {
                ExitCode::SUCCESS
            } else {
                for failure in &report.failures {
                    tracing::error!(track = %failure.track, error = %failure.error, "Track failed");
                }
                ExitCode::FAILURE
            }
        }
    };

    pool.close().await;
    tracing::info!("Milestone worker stopped");
    Ok(code)
}
