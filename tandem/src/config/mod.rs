//! Configuration system for the Tandem client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/tandem/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use crate::session::SessionConfig;
use crate::status::ReceiptConfig;
use crate::store::http::DEFAULT_REQUEST_TIMEOUT;
use crate::transport::reconnect::{BackoffConfig, DEFAULT_RECONNECT_DELAY, ReconnectPolicy};
use crate::transport::websocket::{ChannelConfig, DEFAULT_CONNECT_TIMEOUT};
use crate::typing::TypingConfig;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// A value is present but unusable.
    #[error("invalid config value for {key}: {reason}")]
    Invalid {
        /// Offending key.
        key: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    session: SessionFileConfig,
    typing: TypingFileConfig,
    receipts: ReceiptsFileConfig,
    reconnect: ReconnectFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    api_url: Option<String>,
    ws_url: Option<String>,
    token: Option<String>,
    connect_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
}

/// `[session]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    user: Option<String>,
    conversation: Option<String>,
    page_size: Option<usize>,
    unsend_timeout_ms: Option<u64>,
}

/// `[typing]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct TypingFileConfig {
    timeout_ms: Option<u64>,
    throttle_ms: Option<u64>,
    stale_ms: Option<u64>,
    sweep_interval_ms: Option<u64>,
}

/// `[receipts]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ReceiptsFileConfig {
    visibility_threshold: Option<f64>,
    delivered_delay_ms: Option<u64>,
}

/// `[reconnect]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ReconnectFileConfig {
    /// `"fixed"` (default) or `"backoff"`.
    strategy: Option<String>,
    delay_ms: Option<u64>,
    initial_ms: Option<u64>,
    max_ms: Option<u64>,
    multiplier: Option<f64>,
    jitter: Option<f64>,
    max_attempts: Option<u32>,
}

impl ReconnectFileConfig {
    fn resolve(&self) -> Result<ReconnectPolicy, ConfigError> {
        match self.strategy.as_deref().unwrap_or("fixed") {
            "fixed" => Ok(ReconnectPolicy::Fixed {
                delay: self
                    .delay_ms
                    .map_or(DEFAULT_RECONNECT_DELAY, Duration::from_millis),
            }),
            "backoff" => {
                let defaults = BackoffConfig::default();
                Ok(ReconnectPolicy::Backoff(BackoffConfig {
                    initial: self.initial_ms.map_or(defaults.initial, Duration::from_millis),
                    max: self.max_ms.map_or(defaults.max, Duration::from_millis),
                    multiplier: self.multiplier.unwrap_or(defaults.multiplier),
                    jitter: self.jitter.unwrap_or(defaults.jitter),
                    max_attempts: self.max_attempts.or(defaults.max_attempts),
                }))
            }
            other => Err(ConfigError::Invalid {
                key: "reconnect.strategy",
                reason: format!("expected \"fixed\" or \"backoff\", got {other:?}"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Server --
    /// Base URL of the message store REST API.
    pub api_url: Option<String>,
    /// WebSocket URL of the realtime channel.
    pub ws_url: Option<String>,
    /// Bearer token; falls back to the user id when unset.
    pub token: Option<String>,
    /// WebSocket handshake timeout.
    pub connect_timeout: Duration,
    /// Per-request timeout of store calls.
    pub request_timeout: Duration,
    /// Reconnect policy of the realtime channel.
    pub reconnect: ReconnectPolicy,

    // -- Session --
    /// Local user id.
    pub user: Option<String>,
    /// Conversation to open.
    pub conversation: Option<String>,
    /// Session tuning (typing, receipts, unsend window, page size).
    pub session: SessionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            ws_url: None,
            token: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
            user: None,
            conversation: None,
            session: SessionConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path
    /// (`~/.config/tandem/config.toml`) is tried and silently ignored if
    /// missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed,
    /// or holds an invalid value.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let typing_defaults = defaults.session.typing;
        let receipt_defaults = defaults.session.receipts;

        let visibility_threshold = file
            .receipts
            .visibility_threshold
            .unwrap_or(receipt_defaults.visibility_threshold);
        if !(0.0..=1.0).contains(&visibility_threshold) {
            return Err(ConfigError::Invalid {
                key: "receipts.visibility_threshold",
                reason: format!("{visibility_threshold} is outside 0..=1"),
            });
        }

        Ok(Self {
            api_url: cli.api_url.clone().or_else(|| file.server.api_url.clone()),
            ws_url: cli.ws_url.clone().or_else(|| file.server.ws_url.clone()),
            token: cli.token.clone().or_else(|| file.server.token.clone()),
            connect_timeout: file
                .server
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            request_timeout: file
                .server
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            reconnect: file.reconnect.resolve()?,
            user: cli.user.clone().or_else(|| file.session.user.clone()),
            conversation: cli
                .conversation
                .clone()
                .or_else(|| file.session.conversation.clone()),
            session: SessionConfig {
                typing: TypingConfig {
                    typing_timeout: file
                        .typing
                        .timeout_ms
                        .map_or(typing_defaults.typing_timeout, Duration::from_millis),
                    throttle: file
                        .typing
                        .throttle_ms
                        .map_or(typing_defaults.throttle, Duration::from_millis),
                    stale_threshold: file
                        .typing
                        .stale_ms
                        .map_or(typing_defaults.stale_threshold, Duration::from_millis),
                    sweep_interval: file
                        .typing
                        .sweep_interval_ms
                        .map_or(typing_defaults.sweep_interval, Duration::from_millis),
                },
                receipts: ReceiptConfig {
                    visibility_threshold,
                    delivered_delay: file
                        .receipts
                        .delivered_delay_ms
                        .map_or(receipt_defaults.delivered_delay, Duration::from_millis),
                },
                unsend_timeout: file
                    .session
                    .unsend_timeout_ms
                    .map_or(defaults.session.unsend_timeout, Duration::from_millis),
                page_size: cli
                    .page_size
                    .or(file.session.page_size)
                    .unwrap_or(defaults.session.page_size),
            },
        })
    }

    /// Token to authenticate with: the configured one, else the user id.
    #[must_use]
    pub fn effective_token(&self) -> Option<String> {
        self.token.clone().or_else(|| self.user.clone())
    }

    /// Build a [`ChannelConfig`] if a WebSocket URL is configured.
    #[must_use]
    pub fn to_channel_config(&self) -> Option<ChannelConfig> {
        let url = self.ws_url.clone().filter(|u| !u.is_empty())?;
        Some(ChannelConfig {
            url,
            token: self.effective_token(),
            connect_timeout: self.connect_timeout,
            reconnect: self.reconnect.clone(),
        })
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Terminal client for Tandem one-to-one conversations")]
pub struct CliArgs {
    /// Base URL of the message store REST API.
    #[arg(long, env = "TANDEM_API_URL")]
    pub api_url: Option<String>,

    /// WebSocket URL of the realtime channel.
    #[arg(long, env = "TANDEM_WS_URL")]
    pub ws_url: Option<String>,

    /// Bearer token (default: the user id).
    #[arg(long, env = "TANDEM_TOKEN")]
    pub token: Option<String>,

    /// Your user id.
    #[arg(long, env = "TANDEM_USER")]
    pub user: Option<String>,

    /// Conversation to open.
    #[arg(long, env = "TANDEM_CONVERSATION")]
    pub conversation: Option<String>,

    /// History page size.
    #[arg(long)]
    pub page_size: Option<usize>,

    /// Path to config file (default: `~/.config/tandem/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TANDEM_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/tandem.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("tandem").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
