//! Configuration system for the Tandem dev server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/tandem-devserver/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;

use tandem_proto::message::{Conversation, ConversationId, UserId};

/// Errors that can occur when loading dev server configuration.
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

    /// A seeded conversation is malformed.
    #[error("conversation {id}: {reason}")]
    InvalidConversation {
        /// Offending conversation id.
        id: String,
        /// What is wrong with it.
        reason: &'static str,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct DevConfigFile {
    server: ServerFileConfig,
    conversations: Vec<SeedFileConfig>,
}

/// `[server]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
}

/// One `[[conversations]]` entry created at startup.
#[derive(Debug, serde::Deserialize)]
struct SeedFileConfig {
    id: String,
    participants: Vec<String>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the dev server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Tandem development backend")]
pub struct DevCliArgs {
    /// Address to bind to.
    #[arg(short, long, env = "TANDEM_DEV_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/tandem-devserver/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Conversation to create at startup, as `id:user_a:user_b`. Repeatable.
    #[arg(long = "seed", value_name = "ID:A:B")]
    pub seeds: Vec<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TANDEM_DEV_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved dev server configuration.
#[derive(Debug, Clone)]
pub struct DevConfig {
    /// Address to bind the server to.
    pub bind_addr: String,
    /// Conversations created before the server accepts requests.
    pub conversations: Vec<Conversation>,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for DevConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            conversations: Vec::new(),
            log_level: "info".to_string(),
        }
    }
}

impl DevConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read or
    /// parsed, or if a seeded conversation is malformed.
    pub fn load(cli: &DevCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    /// Priority: CLI > file > default. Seeds from both sources are combined.
    fn resolve(cli: &DevCliArgs, file: &DevConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let mut conversations = Vec::new();
        for seed in &file.conversations {
            conversations.push(seed_conversation(&seed.id, &seed.participants)?);
        }
        for seed in &cli.seeds {
            let mut parts = seed.split(':');
            let id = parts.next().unwrap_or_default();
            let participants: Vec<String> = parts.map(str::to_string).collect();
            conversations.push(seed_conversation(id, &participants)?);
        }

        Ok(Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            conversations,
            log_level: cli.log_level.clone(),
        })
    }
}

fn seed_conversation(id: &str, participants: &[String]) -> Result<Conversation, ConfigError> {
    let invalid = |reason| ConfigError::InvalidConversation {
        id: id.to_string(),
        reason,
    };
    if id.is_empty() {
        return Err(invalid("empty id"));
    }
    let [a, b] = participants else {
        return Err(invalid("needs exactly two participants"));
    };
    if a == b || a.is_empty() || b.is_empty() {
        return Err(invalid("participants must be two distinct users"));
    }
    Ok(Conversation {
        id: ConversationId::new(id),
        participant_ids: [UserId::new(a.as_str()), UserId::new(b.as_str())],
        last_message_at: None,
        unread_count: 0,
    })
}

fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<DevConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(DevConfigFile::default());
        };
        config_dir.join("tandem-devserver").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DevConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
