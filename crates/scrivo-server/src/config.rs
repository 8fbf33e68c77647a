//! Service configuration.
//!
//! Settings come from an optional TOML file and are then overridden by
//! `SCRIVO_*` environment variables. Every section has defaults, so an
//! empty file (or none at all) yields a runnable development setup with an
//! in-memory store and bucket.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use scrivo_gateway::SupabaseConfig;
use scrivo_workflows::WorkflowConfig;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "SCRIVO_";

/// Value of `SCRIVO_CALLBACK_TIMEOUT_SECS` that disables the timeout.
pub const NO_TIMEOUT: &str = "none";

/// Top-level configuration of the `scrivo` binary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrivoConfig {
    /// HTTP listener
    pub server: ServerConfig,

    /// Durable state location
    pub state: StateConfig,

    /// Audio bucket
    pub supabase: SupabaseConfig,

    /// Deepgram credentials
    pub deepgram: ProviderConfig,

    /// Soniox credentials
    pub soniox: ProviderConfig,

    /// Transcription workflow settings
    pub workflow: WorkflowConfig,

    /// Periodic storage sweep
    pub sweep: SweepConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
        }
    }
}

/// Where durable state lives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// redb database file. Unset keeps state in memory, which loses every
    /// in-flight job on restart.
    pub path: Option<PathBuf>,
}

/// Credentials and overrides for one speech-to-text provider.
///
/// A provider is only registered when its API key is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// API key
    pub api_key: Option<String>,

    /// Alternative API base URL
    pub base_url: Option<String>,

    /// Model to request
    pub model: Option<String>,
}

impl ProviderConfig {
    /// Returns the API key when the provider is configured.
    pub fn enabled_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|key| !key.is_empty())
    }
}

/// Periodic sweep of stale uploads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Seconds between sweeps; `0` disables the periodic sweep
    pub interval_secs: u64,

    /// Files older than this are deleted
    pub older_than_hours: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            older_than_hours: 24,
        }
    }
}

impl ScrivoConfig {
    /// Loads the configuration from `path` (if any) and the process
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_from(std::env::vars())?;
        Ok(config)
    }

    /// Reads a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
            .map_err(|e| Error::config(format!("Failed to parse {}: {e}", path.display())))
    }

    /// Parses TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::config(e.to_string()))
    }

    /// Renders the configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::config(e.to_string()))
    }

    /// Applies `SCRIVO_*` overrides from `vars`.
    ///
    /// Unrelated variables are ignored; a recognised variable with an
    /// unparseable value is an error.
    pub fn apply_env_from<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(setting) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match setting {
                "BIND" => self.server.bind = parse_env(&name, &value)?,
                "STATE_PATH" => self.state.path = Some(PathBuf::from(value)),
                "PUBLIC_URL" => self.workflow.public_url = value,
                "SIGNED_URL_TTL_SECS" => {
                    self.workflow.signed_url_ttl_secs = parse_env(&name, &value)?
                }
                "CALLBACK_TIMEOUT_SECS" => {
                    self.workflow.callback_timeout_secs =
                        if value.eq_ignore_ascii_case(NO_TIMEOUT) {
                            None
                        } else {
                            Some(parse_env(&name, &value)?)
                        }
                }
                "SUPABASE_URL" => self.supabase.url = value,
                "SUPABASE_SERVICE_ROLE_KEY" => self.supabase.service_role_key = value,
                "SUPABASE_BUCKET" => self.supabase.bucket = value,
                "DEEPGRAM_API_KEY" => self.deepgram.api_key = Some(value),
                "SONIOX_API_KEY" => self.soniox.api_key = Some(value),
                "SWEEP_INTERVAL_SECS" => self.sweep.interval_secs = parse_env(&name, &value)?,
                "SWEEP_OLDER_THAN_HOURS" => {
                    self.sweep.older_than_hours = parse_env(&name, &value)?
                }
                _ => {
                    tracing::trace!(variable = %name, "Ignoring unknown environment override");
                }
            }
        }
        Ok(())
    }
}

fn parse_env<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| Error::config(format!("invalid value for {name}: {e}")))
}
