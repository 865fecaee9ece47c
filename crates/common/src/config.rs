use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::types::SquashConfig;

/// Global gateway configuration loaded from environment variables.
///
/// Read once at process start; there is no hot reload.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Address the ingestion API listens on (default: 0.0.0.0:8322)
    pub api_addr: SocketAddr,

    /// Redis URL for the durable queue. Unset selects the in-memory queue.
    pub queue_redis_url: Option<String>,

    /// Password for the durable queue, overriding any in the URL
    pub queue_redis_password: Option<String>,

    /// Grace period for draining workers on shutdown (default: 5s)
    pub shutdown_grace: Duration,

    /// Maximum number of buffered invalid-token reports (default: 10000)
    pub feedback_capacity: usize,

    /// FCM legacy server key; the FCM service is only registered when set
    pub fcm_api_key: Option<String>,

    /// FCM send endpoint override
    pub fcm_endpoint: Option<String>,

    /// Worker and rate settings for FCM
    pub fcm: ServiceSettings,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        Ok(Self {
            api_addr: parse_or(&lookup, "API_ADDR", "0.0.0.0:8322".parse()?)?,
            queue_redis_url: lookup("QUEUE_REDIS_URL").filter(|v| !v.is_empty()),
            queue_redis_password: lookup("QUEUE_REDIS_PASSWORD").filter(|v| !v.is_empty()),
            shutdown_grace: Duration::from_secs(parse_or(&lookup, "SHUTDOWN_GRACE_SECS", 5)?),
            feedback_capacity: parse_or(&lookup, "FEEDBACK_CAPACITY", 10_000)?,
            fcm_api_key: lookup("FCM_API_KEY").filter(|v| !v.is_empty()),
            fcm_endpoint: lookup("FCM_ENDPOINT").filter(|v| !v.is_empty()),
            fcm: ServiceSettings::from_lookup(&lookup, "FCM", 4)?,
        })
    }
}

/// Longest accepted rate-limit interval (one day).
const MAX_RATE_PER_SECS: u64 = 86_400;

/// Longest accepted squash window (one hour).
const MAX_SQUASH_WINDOW_MS: u64 = 3_600_000;

/// Registration parameters of a single service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceSettings {
    pub workers: usize,
    pub rate_amount: u32,
    pub rate_per_secs: u64,
    pub squash_window_ms: u64,
    pub squash_max: usize,
}

impl ServiceSettings {
    /// Read `<PREFIX>_WORKERS`, `<PREFIX>_RATE_AMOUNT`, `<PREFIX>_RATE_PER`,
    /// `<PREFIX>_SQUASH_WINDOW_MS` and `<PREFIX>_SQUASH_MAX`.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        prefix: &str,
        default_workers: usize,
    ) -> anyhow::Result<Self> {
        let key = |name: &str| format!("{}_{}", prefix, name);
        let settings = Self {
            workers: parse_or(&lookup, &key("WORKERS"), default_workers)?,
            rate_amount: parse_or(&lookup, &key("RATE_AMOUNT"), 0)?,
            rate_per_secs: parse_or(&lookup, &key("RATE_PER"), 0)?,
            squash_window_ms: parse_or(&lookup, &key("SQUASH_WINDOW_MS"), 0)?,
            squash_max: parse_or(&lookup, &key("SQUASH_MAX"), 0)?,
        };
        if settings.workers == 0 {
            anyhow::bail!("{} must be positive", key("WORKERS"));
        }
        if settings.rate_per_secs > MAX_RATE_PER_SECS {
            anyhow::bail!("{} must be at most {}", key("RATE_PER"), MAX_RATE_PER_SECS);
        }
        if settings.squash_window_ms > MAX_SQUASH_WINDOW_MS {
            anyhow::bail!(
                "{} must be at most {}",
                key("SQUASH_WINDOW_MS"),
                MAX_SQUASH_WINDOW_MS
            );
        }
        Ok(settings)
    }

    pub fn squash_config(&self) -> SquashConfig {
        SquashConfig::rate(self.rate_amount, Duration::from_secs(self.rate_per_secs)).with_squash(
            Duration::from_millis(self.squash_window_ms),
            self.squash_max,
        )
    }
}

fn parse_or<T: FromStr>(
    lookup: impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> anyhow::Result<T> {
    match lookup(key).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: {:?}", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.api_addr.port(), 8322);
        assert!(config.queue_redis_url.is_none());
        assert_eq!(config.shutdown_grace, Duration::from_secs(5));
        assert_eq!(config.feedback_capacity, 10_000);
        assert!(config.fcm_api_key.is_none());
        assert_eq!(config.fcm.workers, 4);
        assert!(!config.fcm.squash_config().is_rate_limited());
    }

    #[test]
    fn test_durable_queue_selected_by_url() {
        let config = AppConfig::from_lookup(lookup(&[
            ("QUEUE_REDIS_URL", "redis://cache:6379"),
            ("QUEUE_REDIS_PASSWORD", "pw"),
        ]))
        .unwrap();
        assert_eq!(config.queue_redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.queue_redis_password.as_deref(), Some("pw"));
    }

    #[test]
    fn test_service_settings() {
        let settings = ServiceSettings::from_lookup(
            lookup(&[
                ("TELEGRAM_WORKERS", "2"),
                ("TELEGRAM_RATE_AMOUNT", "30"),
                ("TELEGRAM_RATE_PER", "1"),
                ("TELEGRAM_SQUASH_WINDOW_MS", "250"),
            ]),
            "TELEGRAM",
            1,
        )
        .unwrap();
        let squash = settings.squash_config();
        assert_eq!(settings.workers, 2);
        assert_eq!(squash.rate_max, 30);
        assert_eq!(squash.rate_per, Duration::from_secs(1));
        assert_eq!(squash.squash_window, Duration::from_millis(250));
        assert_eq!(squash.squash_max, 0);
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = ServiceSettings::from_lookup(lookup(&[("FCM_WORKERS", "many")]), "FCM", 4)
            .unwrap_err();
        assert!(err.to_string().contains("FCM_WORKERS"));
    }

    #[test]
    fn test_zero_workers_is_rejected() {
        assert!(ServiceSettings::from_lookup(lookup(&[("FCM_WORKERS", "0")]), "FCM", 4).is_err());
    }

    #[test]
    fn test_out_of_range_intervals_are_rejected() {
        let err = ServiceSettings::from_lookup(
            lookup(&[("FCM_RATE_PER", "18446744073709551615")]),
            "FCM",
            4,
        )
        .unwrap_err();
        assert!(err.to_string().contains("FCM_RATE_PER"));

        let err = ServiceSettings::from_lookup(
            lookup(&[("FCM_SQUASH_WINDOW_MS", "3600001")]),
            "FCM",
            4,
        )
        .unwrap_err();
        assert!(err.to_string().contains("FCM_SQUASH_WINDOW_MS"));

        let settings =
            ServiceSettings::from_lookup(lookup(&[("FCM_RATE_PER", "86400")]), "FCM", 4).unwrap();
        assert_eq!(settings.squash_config().rate_per, Duration::from_secs(86_400));
    }
}
