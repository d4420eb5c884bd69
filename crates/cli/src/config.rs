//! Runtime configuration assembled from the environment.

use anyhow::{Context, Result, anyhow};
use rust_decimal::Decimal;
use sentinel_execution::prelude::{
    AutoExecutorConfig, KillSwitchConfig, LiquidationConfig, StopLossConfig, TrackerConfig,
};
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

pub const REDIS_URL: &str = "SENTINEL_REDIS_URL";
pub const SYNC_INTERVAL_SECS: &str = "SENTINEL_SYNC_INTERVAL_SECS";
pub const STOP_EVAL_INTERVAL_MS: &str = "SENTINEL_STOP_EVAL_INTERVAL_MS";
pub const KILL_SWITCH_INTERVAL_SECS: &str = "SENTINEL_KILL_SWITCH_INTERVAL_SECS";
pub const KILL_SWITCH_COOLDOWN_SECS: &str = "SENTINEL_KILL_SWITCH_COOLDOWN_SECS";
pub const LIQUIDATION_INTERVAL_SECS: &str = "SENTINEL_LIQUIDATION_INTERVAL_SECS";
pub const MAX_DAILY_LIQUIDATIONS: &str = "SENTINEL_MAX_DAILY_LIQUIDATIONS";
pub const MAX_POSITION_RISK_USD: &str = "SENTINEL_MAX_POSITION_RISK_USD";

/// Configuration of every component run by the binary.
#[derive(Debug, Clone, Default)]
pub struct SentinelConfig {
    /// Redis connection; the in-process store is used when unset.
    pub redis_url: Option<String>,
    pub tracker: TrackerConfig,
    pub stop_loss: StopLossConfig,
    pub auto_executor: AutoExecutorConfig,
    pub kill_switch: KillSwitchConfig,
    pub liquidation: LiquidationConfig,
}

impl SentinelConfig {
    /// Reads the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from `lookup`, falling back to defaults for
    /// unset keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self {
            redis_url: lookup(REDIS_URL).filter(|url| !url.trim().is_empty()),
            ..Self::default()
        };

        if let Some(secs) = parse::<u64>(&lookup, SYNC_INTERVAL_SECS)? {
            config.tracker.sync_interval = positive_secs(SYNC_INTERVAL_SECS, secs)?;
        }
        if let Some(ms) = parse::<u64>(&lookup, STOP_EVAL_INTERVAL_MS)? {
            if ms == 0 {
                return Err(anyhow!("{STOP_EVAL_INTERVAL_MS} must be greater than zero"));
            }
            config.auto_executor.evaluation_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = parse::<u64>(&lookup, KILL_SWITCH_INTERVAL_SECS)? {
            config.kill_switch.monitor_interval = positive_secs(KILL_SWITCH_INTERVAL_SECS, secs)?;
        }
        if let Some(secs) = parse::<u64>(&lookup, KILL_SWITCH_COOLDOWN_SECS)? {
            // zero disables auto-recovery
            config.kill_switch.cooldown_period = Duration::from_secs(secs);
        }
        if let Some(secs) = parse::<u64>(&lookup, LIQUIDATION_INTERVAL_SECS)? {
            config.liquidation.queue_interval = positive_secs(LIQUIDATION_INTERVAL_SECS, secs)?;
        }
        if let Some(max) = parse::<u32>(&lookup, MAX_DAILY_LIQUIDATIONS)? {
            config.liquidation.max_daily_liquidations = max;
        }
        if let Some(risk) = parse::<Decimal>(&lookup, MAX_POSITION_RISK_USD)? {
            if risk <= Decimal::ZERO {
                return Err(anyhow!("{MAX_POSITION_RISK_USD} must be positive, got {risk}"));
            }
            config.stop_loss.max_position_risk_usd = risk;
        }

        Ok(config)
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<T>()
        .map(Some)
        .map_err(|e| anyhow!("{e}"))
        .with_context(|| format!("invalid value for {key}: {raw:?}"))
}

fn positive_secs(key: &str, secs: u64) -> Result<Duration> {
    if secs == 0 {
        return Err(anyhow!("{key} must be greater than zero"));
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = SentinelConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.redis_url, None);
        assert_eq!(config.tracker.sync_interval, Duration::from_secs(5));
        assert_eq!(config.auto_executor.evaluation_interval, Duration::from_secs(1));
        assert_eq!(config.kill_switch.cooldown_period, Duration::from_secs(3600));
        assert_eq!(config.liquidation.max_daily_liquidations, 10);
        assert_eq!(config.stop_loss.max_position_risk_usd, dec!(1000));
    }

    #[test]
    fn test_overrides() {
        let config = SentinelConfig::from_lookup(lookup(&[
            (REDIS_URL, "redis://127.0.0.1:6379"),
            (SYNC_INTERVAL_SECS, "10"),
            (STOP_EVAL_INTERVAL_MS, "250"),
            (KILL_SWITCH_INTERVAL_SECS, "15"),
            (KILL_SWITCH_COOLDOWN_SECS, "0"),
            (LIQUIDATION_INTERVAL_SECS, "2"),
            (MAX_DAILY_LIQUIDATIONS, "3"),
            (MAX_POSITION_RISK_USD, "2500.5"),
        ]))
        .unwrap();
        assert_eq!(config.redis_url.as_deref(), Some("redis://127.0.0.1:6379"));
        assert_eq!(config.tracker.sync_interval, Duration::from_secs(10));
        assert_eq!(config.auto_executor.evaluation_interval, Duration::from_millis(250));
        assert_eq!(config.kill_switch.monitor_interval, Duration::from_secs(15));
        assert!(config.kill_switch.cooldown_period.is_zero());
        assert_eq!(config.liquidation.queue_interval, Duration::from_secs(2));
        assert_eq!(config.liquidation.max_daily_liquidations, 3);
        assert_eq!(config.stop_loss.max_position_risk_usd, dec!(2500.5));
    }

    #[test]
    fn test_malformed_values_are_errors() {
        let err = SentinelConfig::from_lookup(lookup(&[(MAX_DAILY_LIQUIDATIONS, "ten")])).unwrap_err();
        assert!(format!("{err:#}").contains(MAX_DAILY_LIQUIDATIONS));

        assert!(SentinelConfig::from_lookup(lookup(&[(SYNC_INTERVAL_SECS, "0")])).is_err());
        assert!(SentinelConfig::from_lookup(lookup(&[(MAX_POSITION_RISK_USD, "-5")])).is_err());
    }
}
