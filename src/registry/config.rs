use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

/// Decides how strictly configuration mistakes are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Duplicate store names are reported and the first store is reused.
    Development,
    /// Duplicate store names are errors.
    Production,
}

impl Default for Mode {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Mode::Development
        } else {
            Mode::Production
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Mode::Development),
            "production" | "prod" => Ok(Mode::Production),
            other => Err(other.to_string()),
        }
    }
}

/// Where the registry runs. Client-mode resources only fetch on the client,
/// and resource watchers are only installed there.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Client,
    Server,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "client" => Ok(Environment::Client),
            "server" => Ok(Environment::Server),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub mode: Mode,
    pub environment: Environment,
}

impl RegistryConfig {
    pub const MODE_VAR: &'static str = "LARDER_MODE";
    pub const ENVIRONMENT_VAR: &'static str = "LARDER_ENVIRONMENT";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn server(self) -> Self {
        self.environment(Environment::Server)
    }

    pub fn production(self) -> Self {
        self.mode(Mode::Production)
    }

    /// Defaults overridden by `LARDER_MODE` and `LARDER_ENVIRONMENT`.
    pub fn from_env() -> Result<Self, StoreError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StoreError> {
        let mut config = Self::default();
        if let Some(value) = lookup(Self::MODE_VAR) {
            config.mode = value.parse().map_err(|value| StoreError::InvalidConfig {
                var: Self::MODE_VAR,
                value,
            })?;
        }
        if let Some(value) = lookup(Self::ENVIRONMENT_VAR) {
            config.environment = value.parse().map_err(|value| StoreError::InvalidConfig {
                var: Self::ENVIRONMENT_VAR,
                value,
            })?;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_overrides_defaults() {
        let config = RegistryConfig::from_lookup(|var| match var {
            "LARDER_MODE" => Some("Production".to_string()),
            "LARDER_ENVIRONMENT" => Some("server".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config, RegistryConfig::new().production().server());
    }

    #[test]
    fn unknown_environment_is_rejected() {
        let err = RegistryConfig::from_lookup(|var| {
            (var == "LARDER_ENVIRONMENT").then(|| "browser".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("browser"));
    }

    #[test]
    fn missing_fields_deserialize_to_defaults() {
        let config: RegistryConfig = serde_json::from_str(r#"{"environment":"server"}"#).unwrap();
        assert_eq!(config.environment, Environment::Server);
        assert_eq!(config.mode, Mode::default());
    }
}
