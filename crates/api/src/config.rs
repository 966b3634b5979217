//! Application configuration loaded from environment variables.

use std::time::Duration;

use saga::PlatformConfig;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `RELAY_POLL_MS` — outbox relay poll interval (default: `1000`)
/// - `CONSUMER_MAX_IN_FLIGHT` — per-service consumer concurrency (default: `8`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub relay_poll_interval: Duration,
    pub consumer_max_in_flight: usize,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            relay_poll_interval: Duration::from_millis(
                std::env::var("RELAY_POLL_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1000),
            ),
            consumer_max_in_flight: std::env::var("CONSUMER_MAX_IN_FLIGHT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Builds the platform tunables from this configuration.
    pub fn platform_config(&self) -> PlatformConfig {
        let mut platform = PlatformConfig::default();
        platform.relay.poll_interval = self.relay_poll_interval;
        platform.consumer.max_in_flight = self.consumer_max_in_flight;
        platform
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            relay_poll_interval: Duration::from_millis(1000),
            consumer_max_in_flight: 8,
        }
    }
}
