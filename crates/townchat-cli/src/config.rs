//! townchat CLI Configuration Management
//!
//! Configuration is layered with figment, lowest priority first:
//! - built-in defaults
//! - the user config file (`<config dir>/townchat/config.toml`)
//! - `townchat.toml` in the working directory
//! - an explicit `--config` file
//! - environment variables (`TOWNCHAT_*`, nested keys split on `__`)
//! - command line flags

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use townchat_core::{
    Credential, CredentialSource, EnvCredential, FileCredential, ReconnectConfig, SessionConfig,
    StaticCredential,
};
use townchat_transport::{EndpointConfig, EndpointTemplate};

use crate::error::{CliError, Result};

pub const ENV_PREFIX: &str = "TOWNCHAT_";
const LOCAL_CONFIG_FILE: &str = "townchat.toml";

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the townchat CLI
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliAppConfig {
    /// Where conversation channels are opened
    pub server: EndpointConfig,

    /// Session behaviour
    pub session: SessionConfig,

    /// Where the access token comes from
    pub credential: CredentialConfig,

    /// Terminal presentation
    pub cli: CliConfig,
}

/// Access token lookup, first match wins: `token`, `token_file`, `token_env`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialConfig {
    pub token: Option<String>,
    pub token_file: Option<PathBuf>,
    pub token_env: String,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            token: None,
            token_file: None,
            token_env: EnvCredential::DEFAULT_VARIABLE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub verbose: bool,
    /// Prefix messages with their server timestamp
    pub show_timestamps: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            show_timestamps: true,
        }
    }
}

// ----------------------------------------------------------------------------
// Configuration Loading Logic
// ----------------------------------------------------------------------------

impl CliAppConfig {
    /// Load configuration with the standard priority order
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));

        if let Some(path) = Self::default_config_path() {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Toml::file(LOCAL_CONFIG_FILE));

        if let Some(path) = explicit {
            if !path.exists() {
                return Err(CliError::Config(format!(
                    "configuration file {} does not exist",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }

        let config: CliAppConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Apply command line overrides on top of the loaded configuration
    pub fn with_overrides(
        mut self,
        server: Option<String>,
        token: Option<String>,
        verbose: bool,
    ) -> Result<Self> {
        if let Some(server) = server {
            self.server.base_url = server;
        }
        if token.is_some() {
            self.credential.token = token;
        }
        self.cli.verbose |= verbose;

        self.validate()?;
        Ok(self)
    }

    /// Default user configuration file, if the platform has a config dir
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("townchat").join("config.toml"))
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<()> {
        EndpointTemplate::from_config(&self.server)?;
        self.session
            .validate()
            .map_err(|err| CliError::Config(err.to_string()))?;
        if self.credential.token_env.trim().is_empty() {
            return Err(CliError::Config(
                "credential.token_env must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn endpoint(&self) -> Result<EndpointTemplate> {
        Ok(EndpointTemplate::from_config(&self.server)?)
    }

    /// Resolve the access token once, at session creation
    pub fn resolve_credential(&self) -> Result<Option<Credential>> {
        let source: Box<dyn CredentialSource> = match (&self.credential.token, &self.credential.token_file) {
            (Some(token), _) => Box::new(StaticCredential::from_token(token.clone())),
            (None, Some(path)) => Box::new(FileCredential::new(path)),
            (None, None) => Box::new(EnvCredential::new(self.credential.token_env.clone())),
        };
        Ok(source.access_token()?)
    }

    /// Effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Create example configuration file content
    pub fn example_config() -> String {
        let example = CliAppConfig {
            server: EndpointConfig {
                base_url: "https://town.example.com".to_string(),
                ..EndpointConfig::default()
            },
            session: SessionConfig {
                history_page_size: Some(50),
                reconnect: ReconnectConfig::Exponential {
                    base_ms: 500,
                    max_delay_ms: 30_000,
                    max_retries: 5,
                    jitter: 0.2,
                },
                ..SessionConfig::default()
            },
            credential: CredentialConfig {
                token_file: Some(PathBuf::from("~/.config/townchat/token")),
                ..CredentialConfig::default()
            },
            cli: CliConfig::default(),
        };

        toml::to_string_pretty(&example)
            .unwrap_or_else(|_| "# Failed to generate example config".to_string())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
