use anyhow::{Context, Result};
use chrono::Duration;
use rust_decimal::Decimal;

use giveline_core::fees::{FeeAbsorption, FeeConfig};

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub database_url: String,
    pub redis_url: String,
    pub http_addr: String,
    pub provider_api_url: String,
    pub provider_secret_key: String,
    pub webhook_secret: String,
    pub scheduler_secret: String,
    pub platform_fee_pct: Decimal,
    pub decision_window_days: i64,
    pub refund_grace_period_days: i64,
}

impl ServiceConfig {
    pub fn from_env(default_http_addr: &str) -> Result<Self> {
        let http_addr =
            std::env::var("HTTP_ADDR").unwrap_or_else(|_| default_http_addr.to_string());
        let mut config = Self::common_from_env()?;
        config.http_addr = http_addr;
        Ok(config)
    }

    pub fn worker_from_env() -> Result<Self> {
        Self::common_from_env()
    }

    fn common_from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let redis_url = std::env::var("REDIS_URL").context("REDIS_URL is required")?;
        let provider_api_url =
            std::env::var("PROVIDER_API_URL").context("PROVIDER_API_URL is required")?;
        let provider_secret_key =
            std::env::var("PROVIDER_SECRET_KEY").context("PROVIDER_SECRET_KEY is required")?;
        let webhook_secret =
            std::env::var("WEBHOOK_SECRET").context("WEBHOOK_SECRET is required")?;
        let scheduler_secret =
            std::env::var("SCHEDULER_SECRET").context("SCHEDULER_SECRET is required")?;

        let platform_fee_pct = env_decimal("PLATFORM_FEE_PCT", Decimal::from(5))?;
        let decision_window_days = env_i64("DECISION_WINDOW_DAYS", 14)?;
        let refund_grace_period_days = env_i64("REFUND_GRACE_PERIOD_DAYS", 7)?;
        if decision_window_days <= 0 || refund_grace_period_days < 0 {
            anyhow::bail!("decision window and grace period must be positive");
        }

        Ok(Self {
            database_url,
            redis_url,
            http_addr: String::new(),
            provider_api_url,
            provider_secret_key,
            webhook_secret,
            scheduler_secret,
            platform_fee_pct,
            decision_window_days,
            refund_grace_period_days,
        })
    }

    /// Fee configuration validated once at startup. The percentage bound
    /// check lives in [`FeeConfig::new`].
    pub fn fee_config(&self) -> Result<FeeConfig> {
        FeeConfig::new(
            self.platform_fee_pct,
            env_decimal("PROVIDER_FLAT_FEE", Decimal::from(30))?,
            env_decimal("PROVIDER_FEE_RATE", Decimal::ZERO)?,
            FeeAbsorption::DonorPays,
        )
        .map_err(|err| anyhow::anyhow!("invalid fee configuration: {err}"))
    }

    pub fn decision_window(&self) -> Duration {
        Duration::days(self.decision_window_days)
    }

    pub fn refund_grace_period(&self) -> Duration {
        Duration::days(self.refund_grace_period_days)
    }
}

fn env_decimal(name: &str, default: Decimal) -> Result<Decimal> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<Decimal>()
            .with_context(|| format!("{name} must be a decimal number")),
        Err(_) => Ok(default),
    }
}

fn env_i64(name: &str, default: i64) -> Result<i64> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<i64>()
            .with_context(|| format!("{name} must be an integer")),
        Err(_) => Ok(default),
    }
}
