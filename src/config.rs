//! Global configuration parsing and validation.
//!
//! The config file is optional: every field can be supplied (or
//! overridden) from the command line, matching the original
//! flag-driven deployment where the listen address and the downstream
//! command are the only inputs.

use serde::Deserialize;

use crate::{AppError, Result};

fn default_listen_addr() -> String {
    "127.0.0.1:4288".into()
}

fn default_max_frame_bytes() -> usize {
    16 * 1024 * 1024
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// HTTP listen address for the WebSocket gateway.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Downstream server binary (e.g., a language server executable).
    #[serde(default)]
    pub server_command: String,
    /// Arguments passed to the downstream server binary.
    #[serde(default)]
    pub server_args: Vec<String>,
    /// Maximum accepted size of a single JSON-RPC frame, either side.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            server_command: String::new(),
            server_args: Vec::new(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl GlobalConfig {
    /// Parse a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when the TOML is malformed.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        Ok(config)
    }

    /// Validate the configuration after CLI overrides were applied.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when the downstream command is
    /// missing, the listen address does not parse, or the frame limit
    /// is zero.
    pub fn validate(&self) -> Result<()> {
        if self.server_command.is_empty() {
            return Err(AppError::Config(
                "missing required server command (pass it after `--`)".into(),
            ));
        }
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(AppError::Config(format!(
                "invalid listen address: {}",
                self.listen_addr
            )));
        }
        if self.max_frame_bytes == 0 {
            return Err(AppError::Config("max_frame_bytes must be non-zero".into()));
        }
        Ok(())
    }
}
