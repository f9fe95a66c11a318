//! Configuration loading for mcp-toolrelay.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **CLI flags** — `--host`, `--client-id`
//! 2. **Environment variables** — `TOOLRELAY_HOST`, `TOOLRELAY_CLIENT_ID`,
//!    `TOOLRELAY_LISTING_LISTEN`
//! 3. **Config file** — path via `--config <path>`, the `TOOLRELAY_CONFIG`
//!    env var, or `mcp-toolrelay.toml` in CWD
//! 4. **Compiled defaults** — see each field's default value below
//!
//! ```toml
//! [remote]
//! host = "http://127.0.0.1:8000"
//! client_id = "test-client-1"
//! reconnect_delay_secs = 5
//! announce_tools = true
//! refetch_tools_on_reconnect = true
//!
//! [provider]
//! name = "playwright"
//! command = "npx"
//! args = ["@playwright/mcp@latest"]
//! prefix_tool_names = true      # registry names become mcp__playwright__<tool>
//! request_timeout_secs = 30
//! call_timeout_secs = 120
//!
//! [listing]
//! enabled = true
//! listen = "127.0.0.1:3100"
//!
//! [logging]
//! level = "info"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

const DEFAULT_CONFIG_FILE: &str = "mcp-toolrelay.toml";

/// CLI arguments parsed by `clap`.
#[derive(Parser, Debug, Default)]
#[command(
    name = "mcp-toolrelay",
    version,
    about = "Relay remote tool commands to a local MCP server"
)]
pub struct Cli {
    /// Path to TOML config file
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Control server base URL (e.g. http://127.0.0.1:8000)
    #[arg(long)]
    pub host: Option<String>,
    /// Client identifier used in the stream and result URLs
    #[arg(long)]
    pub client_id: Option<String>,
}

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub listing: ListingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Control server connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the control server (default `http://127.0.0.1:8000`).
    #[serde(default = "default_host")]
    pub host: String,
    /// Static client identifier (default `test-client-1`).
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Fixed delay before reconnecting after a stream failure (default 5).
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
    /// POST the tool list to `/register/{client_id}` on every stream open.
    #[serde(default = "default_true")]
    pub announce_tools: bool,
    /// Re-fetch the tool registry from the provider on every reconnect.
    /// `false` keeps the snapshot taken at startup.
    #[serde(default = "default_true")]
    pub refetch_tools_on_reconnect: bool,
}

/// MCP server spawned over stdio.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Server name, used for the tool name prefix (default `playwright`).
    #[serde(default = "default_provider_name")]
    pub name: String,
    #[serde(default = "default_provider_command")]
    pub command: String,
    #[serde(default = "default_provider_args")]
    pub args: Vec<String>,
    /// Extra environment variables for the child process.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Register tools as `mcp__<name>__<tool>` (default true).
    #[serde(default = "default_true")]
    pub prefix_tool_names: bool,
    /// Timeout for `initialize` and `tools/list` (default 30).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Timeout for a single `tools/call` (default 120).
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
}

/// Local development endpoint serving the tool definitions.
#[derive(Debug, Clone, Deserialize)]
pub struct ListingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_listing_listen")]
    pub listen: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_host() -> String {
    "http://127.0.0.1:8000".to_string()
}
fn default_client_id() -> String {
    "test-client-1".to_string()
}
fn default_reconnect_delay() -> u64 {
    5
}
fn default_true() -> bool {
    true
}
fn default_provider_name() -> String {
    "playwright".to_string()
}
fn default_provider_command() -> String {
    "npx".to_string()
}
fn default_provider_args() -> Vec<String> {
    vec!["@playwright/mcp@latest".to_string()]
}
fn default_request_timeout() -> u64 {
    30
}
fn default_call_timeout() -> u64 {
    120
}
fn default_listing_listen() -> String {
    "127.0.0.1:3100".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            client_id: default_client_id(),
            reconnect_delay_secs: default_reconnect_delay(),
            announce_tools: true,
            refetch_tools_on_reconnect: true,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            command: default_provider_command(),
            args: default_provider_args(),
            env: HashMap::new(),
            prefix_tool_names: true,
            request_timeout_secs: default_request_timeout(),
            call_timeout_secs: default_call_timeout(),
        }
    }
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_listing_listen(),
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

impl RemoteConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

impl ProviderConfig {
    /// Prefix prepended to every provider tool name in the registry.
    pub fn tool_name_prefix(&self) -> Option<String> {
        self.prefix_tool_names
            .then(|| format!("mcp__{}__", self.name))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// Load and validate configuration from CLI args, env vars, and config file.
pub fn load_config(cli: &Cli) -> Result<Config, String> {
    let mut config = if let Some(path) = &cli.config {
        load_from_file(&expand_tilde(path))?
    } else if let Ok(path) = std::env::var("TOOLRELAY_CONFIG") {
        load_from_file(&expand_tilde(&PathBuf::from(path)))?
    } else if Path::new(DEFAULT_CONFIG_FILE).exists() {
        load_from_file(Path::new(DEFAULT_CONFIG_FILE))?
    } else {
        Config::default()
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    if let Some(host) = &cli.host {
        config.remote.host = host.clone();
    }
    if let Some(client_id) = &cli.client_id {
        config.remote.client_id = client_id.clone();
    }

    validate(&config)?;
    Ok(config)
}

/// Expand a leading `~` to `$HOME`.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}

fn load_from_file(path: &Path) -> Result<Config, String> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;
    parse_config(&contents)
        .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))
}

fn parse_config(contents: &str) -> Result<Config, toml::de::Error> {
    toml::from_str(contents)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("TOOLRELAY_HOST") {
        config.remote.host = host;
    }
    if let Some(client_id) = var("TOOLRELAY_CLIENT_ID") {
        config.remote.client_id = client_id;
    }
    if let Some(listen) = var("TOOLRELAY_LISTING_LISTEN") {
        config.listing.listen = listen;
    }
}

fn validate(config: &Config) -> Result<(), String> {
    if config.remote.host.trim().is_empty() {
        return Err("remote.host is empty".into());
    }
    if !config.remote.host.starts_with("http://") && !config.remote.host.starts_with("https://") {
        return Err(format!(
            "remote.host '{}' must start with http:// or https://",
            config.remote.host
        ));
    }
    if config.remote.client_id.trim().is_empty() {
        return Err("remote.client_id is empty".into());
    }
    if config.remote.reconnect_delay_secs == 0 {
        return Err("remote.reconnect_delay_secs must be at least 1".into());
    }
    if config.provider.command.trim().is_empty() {
        return Err("provider.command is empty".into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_setup() {
        let config = Config::default();
        assert_eq!(config.remote.host, "http://127.0.0.1:8000");
        assert_eq!(config.remote.client_id, "test-client-1");
        assert_eq!(config.remote.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(config.provider.command, "npx");
        assert_eq!(config.provider.args, vec!["@playwright/mcp@latest"]);
        assert!(config.remote.refetch_tools_on_reconnect);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config = parse_config(
            r#"
            [remote]
            client_id = "lab-7"

            [provider]
            prefix_tool_names = false
            "#,
        )
        .unwrap();
        assert_eq!(config.remote.client_id, "lab-7");
        assert_eq!(config.remote.host, "http://127.0.0.1:8000");
        assert_eq!(config.provider.name, "playwright");
        assert!(config.provider.tool_name_prefix().is_none());
        assert!(config.listing.enabled);
    }

    #[test]
    fn tool_name_prefix_uses_server_name() {
        let provider = ProviderConfig {
            name: "fs".into(),
            ..ProviderConfig::default()
        };
        assert_eq!(provider.tool_name_prefix().as_deref(), Some("mcp__fs__"));
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let mut config = Config::default();
        apply_env_overrides(&mut config, |key| match key {
            "TOOLRELAY_HOST" => Some("https://relay.example.com".into()),
            "TOOLRELAY_CLIENT_ID" => Some("desk-2".into()),
            _ => None,
        });
        assert_eq!(config.remote.host, "https://relay.example.com");
        assert_eq!(config.remote.client_id, "desk-2");
        assert_eq!(config.listing.listen, "127.0.0.1:3100");
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = Config::default();
        config.remote.client_id = " ".into();
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.remote.host = "127.0.0.1:8000".into();
        assert!(validate(&config).unwrap_err().contains("http://"));

        let mut config = Config::default();
        config.remote.reconnect_delay_secs = 0;
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.provider.command = String::new();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn unknown_file_is_an_error() {
        let cli = Cli {
            config: Some(PathBuf::from("/nonexistent/mcp-toolrelay.toml")),
            ..Cli::default()
        };
        let err = load_config(&cli).unwrap_err();
        assert!(err.contains("Failed to read config file"));
    }
}
