//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Command line**: `--listen`
//! 2. **Environment variables**: `TOOLRELAY_LISTEN`
//! 3. **Config file**: path via `--config <path>`, or `toolrelay.toml` in CWD
//! 4. **Compiled defaults**: see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8000"
//! heartbeat_interval_secs = 15   # idle time before a heartbeat event
//! command_timeout_secs = 60      # POST /command wait for the result
//!
//! [logging]
//! level = "info"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_CONFIG_FILE: &str = "toolrelay.toml";

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server and stream timing settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `0.0.0.0:8000`).
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Seconds a stream may sit idle before a `heartbeat` event (default 15).
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Seconds `POST /command/{client_id}` waits for a result (default 60).
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_listen() -> String {
    "0.0.0.0:8000".to_string()
}
fn default_heartbeat_interval() -> u64 {
    15
}
fn default_command_timeout() -> u64 {
    60
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ServerConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, that file must exist. Otherwise looks for
    /// `toolrelay.toml` in the current directory, falling back to compiled
    /// defaults.
    pub fn load(path: Option<&str>) -> Result<Self, String> {
        let mut config = if let Some(p) = path {
            Self::from_file(Path::new(p))?
        } else if Path::new(DEFAULT_CONFIG_FILE).exists() {
            Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
        } else {
            Config::default()
        };

        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;
        toml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file {}: {e}", path.display()))
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(listen) = var("TOOLRELAY_LISTEN") {
            self.server.listen = listen;
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.listen.trim().is_empty() {
            return Err("server.listen must not be empty".into());
        }
        if self.server.heartbeat_interval_secs == 0 {
            return Err("server.heartbeat_interval_secs must be at least 1".into());
        }
        if self.server.command_timeout_secs == 0 {
            return Err("server.command_timeout_secs must be at least 1".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.server.listen, "0.0.0.0:8000");
        assert_eq!(config.server.heartbeat_interval(), Duration::from_secs(15));
        assert_eq!(config.server.command_timeout(), Duration::from_secs(60));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            heartbeat_interval_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.server.heartbeat_interval_secs, 5);
        assert_eq!(config.server.listen, "0.0.0.0:8000");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn env_overrides_listen() {
        let mut config = Config::default();
        config.apply_env(|name| (name == "TOOLRELAY_LISTEN").then(|| "127.0.0.1:9000".to_string()));
        assert_eq!(config.server.listen, "127.0.0.1:9000");
    }

    #[test]
    fn zero_timings_are_rejected() {
        let mut config = Config::default();
        config.server.heartbeat_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.command_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = Config::load(Some("/nonexistent/toolrelay.toml")).unwrap_err();
        assert!(err.contains("Failed to read config file"));
    }
}
