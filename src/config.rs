// ABOUTME: Configuration for the serial link, inbox polling, SMS handler and job queue
// ABOUTME: Defaults mirror the deployed worker and can be overridden from environment variables

use crate::queue::RetryPolicy;
use std::str::FromStr;
use std::time::Duration;
use tracing::{Level, warn};

/// Poll interval used by the worker process when none is configured.
pub const DEFAULT_WORKER_POLL_INTERVAL: Duration = Duration::from_millis(50_000);

/// Serial link settings
///
/// # Example
///
/// ```rust
/// use serialsms::config::SerialConfig;
/// use std::time::Duration;
///
/// let config = SerialConfig::new("/dev/ttyACM0")
///     .with_baud_rate(9600)
///     .with_command_timeout(Duration::from_secs(10));
/// assert_eq!(config.init_delay, Duration::from_millis(1000));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Serial device path (default: /dev/ttyUSB2)
    pub device: String,
    /// Baud rate (default: 115200)
    pub baud_rate: u32,
    /// Delay between opening the port and the first command (default: 1s)
    pub init_delay: Duration,
    /// Time to wait for a command's terminator (default: 5s)
    pub command_timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyUSB2".to_string(),
            baud_rate: 115_200,
            init_delay: Duration::from_millis(1000),
            command_timeout: Duration::from_millis(5000),
        }
    }
}

impl SerialConfig {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            ..Default::default()
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_init_delay(mut self, init_delay: Duration) -> Self {
        self.init_delay = init_delay;
        self
    }

    pub fn with_command_timeout(mut self, command_timeout: Duration) -> Self {
        self.command_timeout = command_timeout;
        self
    }
}

/// Inbox poller settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    /// Time between polls (default: 10s)
    pub interval: Duration,
    /// Delete each message after its handler succeeded (default: true)
    pub delete_after_read: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(10_000),
            delete_after_read: true,
        }
    }
}

impl PollerConfig {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    pub fn with_delete_after_read(mut self, delete_after_read: bool) -> Self {
        self.delete_after_read = delete_after_read;
        self
    }
}

/// SMS handler settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerConfig {
    /// Try to enable push notifications at start (default: true)
    pub enable_realtime: bool,
    /// Settings for the always-on inbox poller
    pub poller: PollerConfig,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            enable_realtime: true,
            poller: PollerConfig::default(),
        }
    }
}

impl HandlerConfig {
    pub fn with_realtime(mut self, enable_realtime: bool) -> Self {
        self.enable_realtime = enable_realtime;
        self
    }

    pub fn with_poller(mut self, poller: PollerConfig) -> Self {
        self.poller = poller;
        self
    }
}

/// Job queue settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Redis connection URL (default: redis://127.0.0.1:6379)
    pub redis_url: String,
    pub retry: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Complete worker configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub serial: SerialConfig,
    pub handler: HandlerConfig,
    pub queue: QueueConfig,
    /// Send test messages after startup
    pub test_mode: bool,
    /// Destination for test messages
    pub test_phone_number: Option<String>,
    pub log_level: Level,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            handler: HandlerConfig::default(),
            queue: QueueConfig::default(),
            test_mode: false,
            test_phone_number: None,
            log_level: Level::INFO,
        }
    }
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`. Malformed values fall back
    /// to their default with a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let millis = |key: &str, default: Duration| {
            Duration::from_millis(parse_or(&lookup, key, default.as_millis() as u64))
        };

        let serial = SerialConfig {
            device: lookup("SERIAL_DEVICE_PORT").unwrap_or(defaults.serial.device),
            baud_rate: parse_or(&lookup, "SERIAL_BAUD_RATE", defaults.serial.baud_rate),
            init_delay: millis("DEVICE_INIT_DELAY", defaults.serial.init_delay),
            command_timeout: millis("AT_COMMAND_TIMEOUT", defaults.serial.command_timeout),
        };

        let handler = HandlerConfig {
            enable_realtime: lookup("ENABLE_REALTIME").is_none_or(|v| v != "false"),
            poller: PollerConfig {
                interval: millis("INBOX_POLL_INTERVAL", DEFAULT_WORKER_POLL_INTERVAL),
                delete_after_read: lookup("DELETE_AFTER_READ").is_none_or(|v| v != "false"),
            },
        };

        let queue = QueueConfig {
            redis_url: lookup("REDIS_URL").unwrap_or(defaults.queue.redis_url),
            retry: RetryPolicy {
                max_attempts: parse_or(
                    &lookup,
                    "QUEUE_MAX_ATTEMPTS",
                    defaults.queue.retry.max_attempts,
                ),
                ..defaults.queue.retry
            },
        };

        Self {
            serial,
            handler,
            queue,
            test_mode: lookup("TEST_MODE").is_some_and(|v| v == "true"),
            test_phone_number: lookup("TEST_PHONE_NUMBER").filter(|v| !v.trim().is_empty()),
            log_level: parse_or(&lookup, "LOG_LEVEL", defaults.log_level),
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = %raw, "Invalid configuration value, using default");
                default
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.serial, SerialConfig::default());
        assert_eq!(config.handler.poller.interval, Duration::from_millis(50_000));
        assert!(config.handler.enable_realtime);
        assert!(config.handler.poller.delete_after_read);
        assert!(!config.test_mode);
        assert_eq!(config.test_phone_number, None);
        assert_eq!(config.queue.retry.max_attempts, 3);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("SERIAL_DEVICE_PORT", "/dev/ttyACM0"),
            ("SERIAL_BAUD_RATE", "9600"),
            ("DEVICE_INIT_DELAY", "250"),
            ("INBOX_POLL_INTERVAL", "2000"),
            ("AT_COMMAND_TIMEOUT", "8000"),
            ("ENABLE_REALTIME", "false"),
            ("TEST_MODE", "true"),
            ("TEST_PHONE_NUMBER", "+15550001"),
            ("QUEUE_MAX_ATTEMPTS", "5"),
            ("LOG_LEVEL", "debug"),
        ]);
        assert_eq!(config.serial.device, "/dev/ttyACM0");
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.serial.init_delay, Duration::from_millis(250));
        assert_eq!(config.serial.command_timeout, Duration::from_secs(8));
        assert_eq!(config.handler.poller.interval, Duration::from_secs(2));
        assert!(!config.handler.enable_realtime);
        assert!(config.test_mode);
        assert_eq!(config.test_phone_number.as_deref(), Some("+15550001"));
        assert_eq!(config.queue.retry.max_attempts, 5);
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    fn test_flags_only_flip_on_exact_literal() {
        let config = config_from(&[("ENABLE_REALTIME", "no"), ("TEST_MODE", "yes")]);
        assert!(config.handler.enable_realtime);
        assert!(!config.test_mode);
    }

    #[test]
    fn test_malformed_number_uses_default() {
        let config = config_from(&[("SERIAL_BAUD_RATE", "fast"), ("AT_COMMAND_TIMEOUT", "-1")]);
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.serial.command_timeout, Duration::from_millis(5000));
    }

    #[test]
    fn test_handler_defaults() {
        let handler = HandlerConfig::default();
        assert_eq!(handler.poller.interval, Duration::from_secs(10));
        assert!(handler.enable_realtime);
    }
}
