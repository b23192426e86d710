use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use tracing::warn;
use uuid::Uuid;

use crate::directory::RefreshPolicy;
use crate::watcher::{valid_delta, WatchOptions};

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub bootstrap_servers: String,
    pub topic: String,
    pub group_id: String,
    pub auto_offset_reset: String,
    pub sasl_mechanism: String,
    pub username: String,
    pub password: String,
    pub security_protocol: String,
    pub max_retries: u32,
    pub circuit_breaker_cooldown: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub kafka: KafkaConfig,
    pub database_url: String,
    /// Conductor whose device feed this instance tracks. Without it the
    /// service only runs the directory.
    pub conductor_id: Option<Uuid>,
    pub watch: WatchOptions,
    pub stale_after: Duration,
    pub ping_interval: Duration,
    pub refresh_policy: RefreshPolicy,
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    parse_valid(key, default, |_| true)
}

fn parse_valid<T: FromStr>(key: &str, default: T, valid: impl Fn(&T) -> bool) -> T {
    checked_value(key, env::var(key).ok().as_deref(), default, valid)
}

fn checked_value<T: FromStr>(
    key: &str,
    raw: Option<&str>,
    default: T,
    valid: impl Fn(&T) -> bool,
) -> T {
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if valid(&value) => value,
        _ => {
            warn!("Invalid {} value '{}', using default", key, raw);
            default
        }
    }
}

impl AppConfig {
    /// Read ahead of `load()` so logging is up before any config warning.
    pub fn log_level() -> String {
        dotenv().ok();
        var_or("LOG_LEVEL", "info")
    }

    pub fn load() -> Result<Self> {
        dotenv().ok();

        let kafka = KafkaConfig {
            bootstrap_servers: var_or("KAFKA_BOOTSTRAP_SERVERS", "localhost:9092"),
            topic: var_or("KAFKA_TOPIC", "conductor-fixes"),
            group_id: var_or("KAFKA_GROUP_ID", "conductor-tracking"),
            auto_offset_reset: var_or("KAFKA_AUTO_OFFSET_RESET", "latest"),
            sasl_mechanism: var_or("KAFKA_SASL_MECHANISM", "SCRAM-SHA-256"),
            username: env::var("KAFKA_USERNAME").unwrap_or_default(),
            password: env::var("KAFKA_PASSWORD").unwrap_or_default(),
            security_protocol: var_or("KAFKA_SECURITY_PROTOCOL", "SASL_PLAINTEXT"),
            max_retries: parse_or("KAFKA_MAX_RETRIES", 5),
            circuit_breaker_cooldown: parse_or("KAFKA_CIRCUIT_BREAKER_COOLDOWN", 300),
        };

        let db_host = var_or("DB_HOST", "localhost");
        let db_port = var_or("DB_PORT", "5432");
        let db_name = var_or("DB_DATABASE", "tuktuk");
        let db_user = var_or("DB_USER", "tuktuk");
        let db_pwd = var_or("DB_PWD", "tuktuk");

        let database_url = format!(
            "postgres://{}:{}@{}:{}/{}",
            db_user, db_pwd, db_host, db_port, db_name
        );

        let conductor_id = match env::var("CONDUCTOR_ID") {
            Ok(raw) if !raw.trim().is_empty() => Some(
                Uuid::parse_str(raw.trim())
                    .with_context(|| format!("CONDUCTOR_ID is not a valid uuid: {raw}"))?,
            ),
            _ => None,
        };

        let defaults = WatchOptions::default();
        let watch = WatchOptions {
            min_interval: Duration::from_millis(parse_or(
                "WATCH_MIN_INTERVAL_MS",
                defaults.min_interval.as_millis() as u64,
            )),
            min_delta_meters: parse_valid(
                "WATCH_MIN_DELTA_METERS",
                defaults.min_delta_meters,
                |m| valid_delta(*m),
            ),
            high_accuracy: parse_or("WATCH_HIGH_ACCURACY", defaults.high_accuracy),
        };

        Ok(Self {
            kafka,
            database_url,
            conductor_id,
            watch,
            stale_after: Duration::from_secs(parse_valid("STALE_AFTER_SECS", 120u64, |s| *s > 0)),
            // a zero period would panic the heartbeat timer
            ping_interval: Duration::from_secs(parse_valid("PING_INTERVAL_SECS", 30u64, |s| *s > 0)),
            refresh_policy: parse_or("DIRECTORY_REFRESH_POLICY", RefreshPolicy::Refetch),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(raw: Option<&str>) -> f64 {
        checked_value("WATCH_MIN_DELTA_METERS", raw, 10.0, |m| valid_delta(*m))
    }

    #[test]
    fn test_min_delta_rejects_unusable_values() {
        assert_eq!(delta(None), 10.0);
        assert_eq!(delta(Some(" 25.5 ")), 25.5);
        assert_eq!(delta(Some("0")), 0.0);
        assert_eq!(delta(Some("NaN")), 10.0);
        assert_eq!(delta(Some("inf")), 10.0);
        assert_eq!(delta(Some("-3")), 10.0);
        assert_eq!(delta(Some("ten")), 10.0);
    }

    #[test]
    fn test_interval_and_ping_values() {
        let interval = |raw| checked_value("WATCH_MIN_INTERVAL_MS", raw, 3000u64, |_| true);
        assert_eq!(interval(Some("1500")), 1500);
        assert_eq!(interval(Some("-1")), 3000);

        let ping = |raw| checked_value("PING_INTERVAL_SECS", raw, 30u64, |s| *s > 0);
        assert_eq!(ping(Some("0")), 30);
        assert_eq!(ping(Some("5")), 5);
    }

    #[test]
    fn test_refresh_policy_value() {
        let policy = |raw| {
            checked_value("DIRECTORY_REFRESH_POLICY", raw, RefreshPolicy::Refetch, |_| true)
        };
        assert_eq!(policy(None), RefreshPolicy::Refetch);
        assert_eq!(policy(Some("delta")), RefreshPolicy::Delta);
        assert_eq!(policy(Some("sometimes")), RefreshPolicy::Refetch);
    }
}
