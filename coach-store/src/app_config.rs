use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub redis: Option<RedisConfig>,
    #[serde(default)]
    pub reservation: ReservationConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Redis,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReservationConfig {
    #[serde(default = "default_claim_timeout_ms")]
    pub claim_timeout_ms: u64,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self { claim_timeout_ms: default_claim_timeout_ms() }
    }
}

fn default_claim_timeout_ms() -> u64 { 2000 }

#[derive(Debug, Deserialize, Clone)]
pub struct NotificationConfig {
    /// Events queued per observer before it is considered unresponsive.
    #[serde(default = "default_observer_buffer")]
    pub observer_buffer: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { observer_buffer: default_observer_buffer() }
    }
}

fn default_observer_buffer() -> usize { 64 }

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Optional per-environment overrides, then an uncommitted local file
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(config::File::with_name("config/local").required(false))
            // Eg.. `COACH_SERVER__PORT=8080` overrides `server.port`
            .add_source(config::Environment::with_prefix("COACH").separator("__"))
            .build()?;

        Self::validated(s.try_deserialize()?)
    }

    pub fn from_toml(source: &str) -> Result<Self, config::ConfigError> {
        let s = config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?;

        Self::validated(s.try_deserialize()?)
    }

    fn validated(config: Self) -> Result<Self, config::ConfigError> {
        if config.store.backend == StoreBackend::Redis && config.redis.is_none() {
            return Err(config::ConfigError::Message(
                "store.backend is \"redis\" but redis.url is not set".into(),
            ));
        }
        if config.notifications.observer_buffer == 0 {
            return Err(config::ConfigError::Message(
                "notifications.observer_buffer must be at least 1".into(),
            ));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_optional_sections() {
        let config = Config::from_toml(
            r#"
            [server]
            port = 5000

            [store]
            backend = "memory"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 5000);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.reservation.claim_timeout_ms, 2000);
        assert_eq!(config.notifications.observer_buffer, 64);
    }

    #[test]
    fn redis_backend_requires_url() {
        let err = Config::from_toml(
            r#"
            [server]
            port = 5000

            [store]
            backend = "redis"
            "#,
        )
        .unwrap_err();

        assert!(err.to_string().contains("redis.url"));
    }

    #[test]
    fn redis_backend_with_url() {
        let config = Config::from_toml(
            r#"
            [server]
            port = 5000

            [store]
            backend = "redis"

            [redis]
            url = "redis://127.0.0.1:6379"

            [reservation]
            claim_timeout_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.redis.unwrap().url, "redis://127.0.0.1:6379");
        assert_eq!(config.reservation.claim_timeout_ms, 500);
    }
}
