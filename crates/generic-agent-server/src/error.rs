use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration value: {key} (set {env_var})")]
    MissingValue { key: String, env_var: String },
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// The environment variable that overrides `key`.
pub fn to_env_var(key: &str) -> String {
    format!("AGENT_SERVER__{}", key.to_uppercase())
}
