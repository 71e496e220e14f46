use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use etcetera::{choose_app_strategy, AppStrategy, AppStrategyArgs};
use generic_agent::items::ItemFormat;
use once_cell::sync::Lazy;
use serde::Deserialize;

use crate::error::{to_env_var, ConfigError};

pub static APP_STRATEGY: Lazy<AppStrategyArgs> = Lazy::new(|| AppStrategyArgs {
    top_level_domain: "dev".to_string(),
    author: "generic-agent".to_string(),
    app_name: "generic-agent".to_string(),
});

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_APP_NAME: &str = "agent";
pub const DEFAULT_SESSION_TIMEOUT_SECONDS: u64 = 3600;
pub const DEFAULT_CLEANUP_INTERVAL_SECONDS: u64 = 300;
pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:5173";

const SYNC_SESSION_URI: &str = "sqlite:///./sessions.db";
const ASYNC_SESSION_URI: &str = "sqlite+aiosqlite:///./sessions.db";

/// Which flavour of the agent to serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Plain item labels, synchronous storage driver, no CORS.
    #[default]
    Labels,
    /// Structured item records, asynchronous storage driver, CORS for one origin.
    Records,
}

impl Profile {
    pub fn item_format(self) -> ItemFormat {
        match self {
            Profile::Labels => ItemFormat::Labels,
            Profile::Records => ItemFormat::Records,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub profile: Profile,
    pub app_name: String,
    /// Storage URI; defaults to `./sessions.db` with the profile's driver.
    #[serde(default)]
    pub session_uri: Option<String>,
    pub session_timeout_seconds: u64,
    pub cleanup_interval_seconds: u64,
    /// Allowed browser origin; defaults per profile.
    #[serde(default)]
    pub cors_origin: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            profile: Profile::default(),
            app_name: DEFAULT_APP_NAME.to_string(),
            session_uri: None,
            session_timeout_seconds: DEFAULT_SESSION_TIMEOUT_SECONDS,
            cleanup_interval_seconds: DEFAULT_CLEANUP_INTERVAL_SECONDS,
            cors_origin: None,
        }
    }
}

impl Settings {
    /// Defaults, then the config file, then `AGENT_SERVER__*`, then `PORT`.
    ///
    /// An explicit `config_path` must exist; the per-user
    /// `config.toml` is optional.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("host", DEFAULT_HOST)?
            .set_default("port", i64::from(DEFAULT_PORT))?
            .set_default("app_name", DEFAULT_APP_NAME)?
            .set_default("session_timeout_seconds", DEFAULT_SESSION_TIMEOUT_SECONDS)?
            .set_default("cleanup_interval_seconds", DEFAULT_CLEANUP_INTERVAL_SECONDS)?;

        builder = match config_path {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => match default_config_path() {
                Some(path) => builder.add_source(File::from(path).required(false)),
                None => builder,
            },
        };

        let config = builder
            .add_source(
                Environment::with_prefix("AGENT_SERVER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("port", std::env::var("PORT").ok())?
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.app_name.trim().is_empty() {
            return Err(ConfigError::MissingValue {
                key: "app_name".to_string(),
                env_var: to_env_var("app_name"),
            });
        }
        self.host.parse::<IpAddr>().map_err(|e| ConfigError::InvalidValue {
            key: "host".to_string(),
            message: e.to_string(),
        })?;
        if self.cleanup_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                key: "cleanup_interval_seconds".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        match self.host.parse::<IpAddr>() {
            Ok(ip) => SocketAddr::new(ip, self.port),
            Err(_) => SocketAddr::from(([0, 0, 0, 0], self.port)),
        }
    }

    pub fn session_uri(&self) -> String {
        self.session_uri.clone().unwrap_or_else(|| {
            match self.profile {
                Profile::Labels => SYNC_SESSION_URI,
                Profile::Records => ASYNC_SESSION_URI,
            }
            .to_string()
        })
    }

    pub fn cors_origin(&self) -> Option<String> {
        self.cors_origin.clone().or_else(|| match self.profile {
            Profile::Labels => None,
            Profile::Records => Some(DEFAULT_CORS_ORIGIN.to_string()),
        })
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_seconds)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    choose_app_strategy(APP_STRATEGY.clone())
        .ok()
        .map(|strategy| strategy.config_dir().join("config.toml"))
}
