//! Konfiguration aus Umgebungsvariablen
//!
//! | Variable | Default |
//! |---|---|
//! | `LEXCALL_SIGNALING_URL` | `https://signaling.lexcall.app` |
//! | `LEXCALL_DATA_DIR` | Datenverzeichnis der Plattform |
//! | `LEXCALL_ANSWER_TIMEOUT_SECS` | `30` |
//! | `LEXCALL_TURN_URL`, `LEXCALL_TURN_USERNAME`, `LEXCALL_TURN_CREDENTIAL` | kein TURN |
//! | `LEXCALL_LOG` | `info,lexcall=debug,lexcall_lib=debug` |

use crate::call_engine::{default_ice_servers, CallConfig, IceServer, DEFAULT_ANSWER_TIMEOUT};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_SIGNALING_URL: &str = "https://signaling.lexcall.app";
pub const DEFAULT_LOG_DIRECTIVE: &str = "info,lexcall=debug,lexcall_lib=debug";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },

    #[error("{0} is set but LEXCALL_TURN_URL is missing")]
    IncompleteTurn(&'static str),

    #[error("Could not determine app data directory")]
    NoDataDir,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub signaling_url: Url,
    pub data_dir: PathBuf,
    pub answer_timeout: Duration,
    pub turn_server: Option<IceServer>,
    pub log_directive: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Wie `from_env`, aber mit beliebiger Quelle für die Variablen
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let raw_url =
            value("LEXCALL_SIGNALING_URL").unwrap_or_else(|| DEFAULT_SIGNALING_URL.to_string());
        let signaling_url = Url::parse(&raw_url).map_err(|_| ConfigError::InvalidValue {
            key: "LEXCALL_SIGNALING_URL".to_string(),
            value: raw_url.clone(),
        })?;

        let data_dir = match value("LEXCALL_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir()?,
        };

        let answer_timeout = match value("LEXCALL_ANSWER_TIMEOUT_SECS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "LEXCALL_ANSWER_TIMEOUT_SECS".to_string(),
                        value: raw,
                    })
                }
            },
            None => DEFAULT_ANSWER_TIMEOUT,
        };

        let turn_server = match value("LEXCALL_TURN_URL") {
            Some(url) => Some(IceServer {
                urls: vec![url],
                username: value("LEXCALL_TURN_USERNAME").unwrap_or_default(),
                credential: value("LEXCALL_TURN_CREDENTIAL").unwrap_or_default(),
            }),
            None => {
                for key in ["LEXCALL_TURN_USERNAME", "LEXCALL_TURN_CREDENTIAL"] {
                    if value(key).is_some() {
                        return Err(ConfigError::IncompleteTurn(key));
                    }
                }
                None
            }
        };

        Ok(Self {
            signaling_url,
            data_dir,
            answer_timeout,
            turn_server,
            log_directive: value("LEXCALL_LOG")
                .unwrap_or_else(|| DEFAULT_LOG_DIRECTIVE.to_string()),
        })
    }

    /// STUN-Default plus optionaler TURN-Server
    pub fn ice_servers(&self) -> Vec<IceServer> {
        let mut servers = default_ice_servers();
        servers.extend(self.turn_server.clone());
        servers
    }

    pub fn call_config(&self) -> CallConfig {
        CallConfig {
            ice_servers: self.ice_servers(),
            answer_timeout: self.answer_timeout,
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("lexcall.db")
    }

    pub fn identity_key_path(&self) -> PathBuf {
        self.data_dir.join("keys").join("identity.key")
    }
}

fn default_data_dir() -> Result<PathBuf, ConfigError> {
    directories::ProjectDirs::from("app", "lexcall", "lexcall")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or(ConfigError::NoDataDir)
}
