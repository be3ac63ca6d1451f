// config.rs
use std::str::FromStr;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub unlock_sweep_interval_secs: u64,
    pub unlock_sweep_batch_size: i64,
    pub settlement_preview_ttl_secs: i64,
    // Freeze windows in days, by product category
    pub freeze_promotional_days: i64,
    pub freeze_standard_days: i64,
    pub freeze_allow_acceptance_fallback: bool,
}

impl Config {
    pub fn init() -> Result<Config> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        Ok(Config {
            database_url,
            db_max_connections: env_or("DB_MAX_CONNECTIONS", 20)?,
            db_min_connections: env_or("DB_MIN_CONNECTIONS", 5)?,
            unlock_sweep_interval_secs: env_or("UNLOCK_SWEEP_INTERVAL_SECS", 300)?,
            unlock_sweep_batch_size: env_or("UNLOCK_SWEEP_BATCH_SIZE", 200)?,
            settlement_preview_ttl_secs: env_or("SETTLEMENT_PREVIEW_TTL_SECS", 900)?,
            freeze_promotional_days: env_or("FREEZE_PROMOTIONAL_DAYS", 3)?,
            freeze_standard_days: env_or("FREEZE_STANDARD_DAYS", 7)?,
            freeze_allow_acceptance_fallback: env_or("FREEZE_ALLOW_ACCEPTANCE_FALLBACK", false)?,
        })
    }

    pub fn preview_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.settlement_preview_ttl_secs)
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{} has an invalid value: {:?}", key, raw)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_parses_and_defaults() {
        std::env::set_var("DISPATCHPAY_TEST_BATCH", " 42 ");
        assert_eq!(env_or::<i64>("DISPATCHPAY_TEST_BATCH", 1).unwrap(), 42);
        assert_eq!(env_or::<i64>("DISPATCHPAY_TEST_UNSET", 7).unwrap(), 7);

        std::env::set_var("DISPATCHPAY_TEST_FLAG", "maybe");
        assert!(env_or::<bool>("DISPATCHPAY_TEST_FLAG", false).is_err());
    }
}
