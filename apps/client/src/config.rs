use std::time::Duration;

use chatty_shared::constants::{
    DEFAULT_RSA_KEY_BITS, HEARTBEAT_INTERVAL_SECS, KEY_REQUEST_TIMEOUT_SECS, MIN_RSA_KEY_BITS,
    RECONNECT_DELAY_SECS,
};
use serde::Deserialize;

use crate::error::ClientError;
use crate::session::SessionTiming;

/// Client configuration loaded from chatty.toml with env var overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Relay WebSocket URL. Default: "wss://api.chattyapp.cf"
    #[serde(default = "default_relay_url")]
    pub relay_url: String,
    /// SQLite database holding identity, trust table and conversations.
    /// Default: "chatty.db"
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Tracing log level. Default: "info"
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// RSA modulus size for newly generated identities. Default: 4096
    #[serde(default = "default_rsa_key_bits")]
    pub rsa_key_bits: usize,
    /// Seconds between heartbeat pings. Default: 3
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Seconds to wait before reconnecting. Default: 5
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    /// Seconds before an unanswered key fetch fails its queued work. Default: 10
    #[serde(default = "default_key_request_timeout_secs")]
    pub key_request_timeout_secs: u64,
}

fn default_relay_url() -> String {
    "wss://api.chattyapp.cf".to_string()
}
fn default_db_path() -> String {
    "chatty.db".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_rsa_key_bits() -> usize {
    DEFAULT_RSA_KEY_BITS
}
fn default_heartbeat_interval_secs() -> u64 {
    HEARTBEAT_INTERVAL_SECS
}
fn default_reconnect_delay_secs() -> u64 {
    RECONNECT_DELAY_SECS
}
fn default_key_request_timeout_secs() -> u64 {
    KEY_REQUEST_TIMEOUT_SECS
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: default_relay_url(),
            db_path: default_db_path(),
            log_level: default_log_level(),
            rsa_key_bits: default_rsa_key_bits(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            key_request_timeout_secs: default_key_request_timeout_secs(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from TOML file with environment variable overrides.
    ///
    /// Reads `chatty.toml` from CWD (or path in `CONFIG_PATH` env var). A
    /// missing file means all defaults; env vars still apply.
    pub fn load() -> Result<Self, ClientError> {
        let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "chatty.toml".to_string());
        match std::fs::read_to_string(&path) {
            Ok(contents) => Self::from_toml_str(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut config = Self::default();
                config.apply_env_overrides()?;
                Ok(config)
            }
            Err(e) => Err(ClientError::Config(format!("cannot read {path}: {e}"))),
        }
    }

    /// Load configuration from a TOML string, then apply env var overrides.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ClientError> {
        let mut config: ClientConfig =
            toml::from_str(toml_str).map_err(|e| ClientError::Config(e.to_string()))?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment variable overrides to the config.
    ///
    /// Returns an error if an env var is set but has an invalid format
    /// (e.g., RSA_KEY_BITS=abc), or if the result is out of range.
    pub fn apply_env_overrides(&mut self) -> Result<(), ClientError> {
        if let Ok(val) = std::env::var("RELAY_URL") {
            self.relay_url = val;
        }
        if let Ok(val) = std::env::var("DB_PATH") {
            self.db_path = val;
        }
        if let Ok(val) = std::env::var("LOG_LEVEL") {
            self.log_level = val;
        }
        if let Ok(val) = std::env::var("RSA_KEY_BITS") {
            self.rsa_key_bits = parse_env("RSA_KEY_BITS", &val)?;
        }
        if let Ok(val) = std::env::var("HEARTBEAT_INTERVAL_SECS") {
            self.heartbeat_interval_secs = parse_env("HEARTBEAT_INTERVAL_SECS", &val)?;
        }
        if let Ok(val) = std::env::var("RECONNECT_DELAY_SECS") {
            self.reconnect_delay_secs = parse_env("RECONNECT_DELAY_SECS", &val)?;
        }
        if let Ok(val) = std::env::var("KEY_REQUEST_TIMEOUT_SECS") {
            self.key_request_timeout_secs = parse_env("KEY_REQUEST_TIMEOUT_SECS", &val)?;
        }
        self.validate()
    }

    fn validate(&self) -> Result<(), ClientError> {
        if self.rsa_key_bits < MIN_RSA_KEY_BITS {
            return Err(ClientError::Config(format!(
                "rsa_key_bits must be at least {MIN_RSA_KEY_BITS}, got {}",
                self.rsa_key_bits
            )));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(ClientError::Config(
                "heartbeat_interval_secs must be positive".into(),
            ));
        }
        if self.key_request_timeout_secs == 0 {
            return Err(ClientError::Config(
                "key_request_timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Session timers derived from this configuration.
    pub fn timing(&self) -> SessionTiming {
        SessionTiming {
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
            key_request_timeout: Duration::from_secs(self.key_request_timeout_secs),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, val: &str) -> Result<T, ClientError> {
    val.parse()
        .map_err(|_| ClientError::Config(format!("invalid {name} value: {val}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_config_loads_from_valid_toml_string() {
        let toml = r#"
            relay_url = "ws://127.0.0.1:9000"
            db_path = "/tmp/chatty-test.db"
            log_level = "debug"
            rsa_key_bits = 2048
            heartbeat_interval_secs = 1
            reconnect_delay_secs = 2
            key_request_timeout_secs = 4
        "#;
        let config = ClientConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.relay_url, "ws://127.0.0.1:9000");
        assert_eq!(config.db_path, "/tmp/chatty-test.db");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.rsa_key_bits, 2048);
        let timing = config.timing();
        assert_eq!(timing.heartbeat_interval, Duration::from_secs(1));
        assert_eq!(timing.reconnect_delay, Duration::from_secs(2));
        assert_eq!(timing.key_request_timeout, Duration::from_secs(4));
    }

    #[test]
    #[serial]
    fn test_config_has_correct_defaults_for_omitted_fields() {
        let config = ClientConfig::from_toml_str("").unwrap();
        assert_eq!(config.relay_url, "wss://api.chattyapp.cf");
        assert_eq!(config.db_path, "chatty.db");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.rsa_key_bits, 4096);
        assert_eq!(config.heartbeat_interval_secs, 3);
        assert_eq!(config.reconnect_delay_secs, 5);
        assert_eq!(config.key_request_timeout_secs, 10);
    }

    #[test]
    #[serial]
    fn test_config_applies_env_var_overrides() {
        std::env::set_var("RELAY_URL", "ws://overridden:1234");
        std::env::set_var("RECONNECT_DELAY_SECS", "7");
        let config = ClientConfig::from_toml_str(r#"relay_url = "ws://original""#);
        std::env::remove_var("RELAY_URL");
        std::env::remove_var("RECONNECT_DELAY_SECS");

        let config = config.unwrap();
        assert_eq!(config.relay_url, "ws://overridden:1234");
        assert_eq!(config.reconnect_delay_secs, 7);
    }

    #[test]
    #[serial]
    fn test_config_rejects_invalid_env_value() {
        std::env::set_var("RSA_KEY_BITS", "lots");
        let result = ClientConfig::from_toml_str("");
        std::env::remove_var("RSA_KEY_BITS");
        assert!(matches!(result, Err(ClientError::Config(_))));
    }

    #[test]
    #[serial]
    fn test_config_rejects_small_rsa_modulus() {
        let result = ClientConfig::from_toml_str("rsa_key_bits = 1024");
        assert!(matches!(result, Err(ClientError::Config(_))));
    }

    #[test]
    #[serial]
    fn test_config_fails_on_malformed_toml() {
        let result = ClientConfig::from_toml_str("this is not valid = [[[toml");
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn test_missing_config_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("CONFIG_PATH", dir.path().join("absent.toml"));
        let config = ClientConfig::load();
        std::env::remove_var("CONFIG_PATH");
        assert_eq!(config.unwrap().relay_url, "wss://api.chattyapp.cf");
    }
}
