//! Scheduled worker: runs the refund trigger scan and auto-refund sweep on a
//! fixed interval. The gateway exposes the same sweep behind
//! `/jobs/refund-sweep` for external schedulers; this worker covers
//! deployments without one.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tracing::{error, info};

use giveline_core::storage::Store;
use giveline_engine::{DecisionEngine, RefundSweeper};
use giveline_platform::{RedisBus, ServiceConfig, connect_database};
use giveline_provider::HttpPaymentProvider;
use giveline_store::PgStore;

const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "giveline_ops=info".to_string()),
        )
        .init();

    let config = ServiceConfig::worker_from_env()?;
    let pool = connect_database(&config.database_url).await?;
    let pg = PgStore::new(pool);
    pg.migrate().await?;
    let store: Arc<dyn Store> = Arc::new(pg);

    let redis = RedisBus::connect(&config.redis_url)?;
    let dispatcher = Arc::new(redis);
    let provider = Arc::new(
        HttpPaymentProvider::new(&config.provider_api_url, &config.provider_secret_key)
            .map_err(|err| anyhow::anyhow!("provider client init failed: {err}"))?,
    );

    let decisions = DecisionEngine::new(store.clone(), provider, dispatcher.clone());
    let sweeper = RefundSweeper::new(
        store,
        dispatcher,
        decisions,
        config.decision_window(),
        config.refund_grace_period(),
    );

    let interval_secs = std::env::var("SWEEP_INTERVAL_SECS")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS);
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));

    info!("refund worker sweeping every {interval_secs}s");

    loop {
        ticker.tick().await;
        match sweeper.run(Utc::now()).await {
            Ok(summary) if summary.skipped => {}
            Ok(summary) => {
                info!(
                    processed = summary.processed_count,
                    auto_refunded = summary.auto_refunded_count,
                    "refund sweep complete"
                );
            }
            Err(err) => error!("refund sweep failed: {err}"),
        }
    }
}
