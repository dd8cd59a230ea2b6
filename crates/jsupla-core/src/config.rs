//! Server configuration.
//!
//! Values come from built-in defaults, then an optional TOML file, then
//! `JSUPLA_*` environment variables. Exactly one device authorization scheme
//! is active per deployment.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::protocol::ActivityTimeout;

/// Default values.
pub mod defaults {
    pub const HOST: &str = "0.0.0.0";
    pub const PORT: u16 = 2016;
    /// Device liveness timeout in seconds.
    pub const DEVICE_TIMEOUT_SECS: u32 = 10;
    pub const BRIDGE_ID: &str = "server-bridge";
    pub const EVENT_CAPACITY: usize = 1000;
}

/// Environment variable names.
pub mod env_vars {
    pub const CONFIG: &str = "JSUPLA_CONFIG";
    pub const HOST: &str = "JSUPLA_HOST";
    pub const PORT: &str = "JSUPLA_PORT";
    pub const ACCESS_ID: &str = "JSUPLA_ACCESS_ID";
    pub const ACCESS_ID_PASSWORD: &str = "JSUPLA_ACCESS_ID_PASSWORD";
    pub const EMAIL: &str = "JSUPLA_EMAIL";
    pub const AUTH_KEY: &str = "JSUPLA_AUTH_KEY";
    pub const DEVICE_TIMEOUT_SECS: &str = "JSUPLA_DEVICE_TIMEOUT_SECS";
    pub const AUTO_PROVISION: &str = "JSUPLA_AUTO_PROVISION";
    pub const LOG_JSON: &str = "JSUPLA_LOG_JSON";
}

/// Smallest timeout that keeps the negotiated lower bound positive.
const MIN_DEVICE_TIMEOUT_SECS: u32 = 3;

/// Server secret used to authorize registering devices.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum AuthConfig {
    Location {
        access_id: i32,
        access_id_password: String,
    },
    Email {
        email: String,
        auth_key: String,
    },
}

impl AuthConfig {
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Location { .. } => "location",
            Self::Email { .. } => "email",
        }
    }

    /// Copy with secrets masked, for display.
    pub fn redacted(&self) -> Self {
        match self {
            Self::Location { access_id, .. } => Self::Location {
                access_id: *access_id,
                access_id_password: "***".to_string(),
            },
            Self::Email { email, .. } => Self::Email {
                email: email.clone(),
                auth_key: "***".to_string(),
            },
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::Location {
            access_id: 0,
            access_id_password: String::new(),
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Location { access_id, .. } => f
                .debug_struct("Location")
                .field("access_id", access_id)
                .field("access_id_password", &"***")
                .finish(),
            Self::Email { email, .. } => f
                .debug_struct("Email")
                .field("email", email)
                .field("auth_key", &"***")
                .finish(),
        }
    }
}

/// jSupla server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Seconds without any inbound message before a device is considered dead.
    pub device_timeout_secs: u32,
    /// Create a device for every discovered GUID automatically.
    pub auto_provision: bool,
    /// Identifier of the server bridge discovered devices hang off.
    pub bridge_id: String,
    pub event_capacity: usize,
    pub auth: AuthConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: defaults::HOST.to_string(),
            port: defaults::PORT,
            auth: AuthConfig::default(),
            device_timeout_secs: defaults::DEVICE_TIMEOUT_SECS,
            auto_provision: true,
            bridge_id: defaults::BRIDGE_ID.to_string(),
            event_capacity: defaults::EVENT_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Load configuration: file (if any), environment overrides, validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content, &path.display().to_string())
    }

    pub fn from_toml_str(content: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })
    }

    /// Apply `JSUPLA_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides using a custom variable lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(env_vars::HOST) {
            self.host = host;
        }
        if let Some(port) = lookup(env_vars::PORT) {
            self.port = parse_env(env_vars::PORT, port)?;
        }
        if let Some(timeout) = lookup(env_vars::DEVICE_TIMEOUT_SECS) {
            self.device_timeout_secs = parse_env(env_vars::DEVICE_TIMEOUT_SECS, timeout)?;
        }
        if let Some(auto) = lookup(env_vars::AUTO_PROVISION) {
            self.auto_provision = parse_env(env_vars::AUTO_PROVISION, auto)?;
        }

        let access_id = lookup(env_vars::ACCESS_ID);
        let access_id_password = lookup(env_vars::ACCESS_ID_PASSWORD);
        let email = lookup(env_vars::EMAIL);
        let auth_key = lookup(env_vars::AUTH_KEY);

        let location_env = access_id.is_some() || access_id_password.is_some();
        let email_env = email.is_some() || auth_key.is_some();
        if location_env && email_env {
            return Err(ConfigError::Validation(
                "both location and email credentials set in environment".to_string(),
            ));
        }

        if location_env {
            let (mut id, mut password) = match &self.auth {
                AuthConfig::Location {
                    access_id,
                    access_id_password,
                } => (*access_id, access_id_password.clone()),
                AuthConfig::Email { .. } => (0, String::new()),
            };
            if let Some(value) = access_id {
                id = parse_env(env_vars::ACCESS_ID, value)?;
            }
            if let Some(value) = access_id_password {
                password = value;
            }
            self.auth = AuthConfig::Location {
                access_id: id,
                access_id_password: password,
            };
        } else if email_env {
            let (mut current_email, mut key) = match &self.auth {
                AuthConfig::Email { email, auth_key } => (email.clone(), auth_key.clone()),
                AuthConfig::Location { .. } => (String::new(), String::new()),
            };
            if let Some(value) = email {
                current_email = value;
            }
            if let Some(value) = auth_key {
                key = value;
            }
            self.auth = AuthConfig::Email {
                email: current_email,
                auth_key: key,
            };
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.auth {
            AuthConfig::Location {
                access_id_password, ..
            } if access_id_password.is_empty() => {
                return Err(ConfigError::Validation(
                    "auth.access_id_password must not be empty".to_string(),
                ));
            }
            AuthConfig::Email { email, auth_key } if email.is_empty() || auth_key.is_empty() => {
                return Err(ConfigError::Validation(
                    "auth.email and auth.auth_key must not be empty".to_string(),
                ));
            }
            _ => {}
        }
        if self.device_timeout_secs < MIN_DEVICE_TIMEOUT_SECS {
            return Err(ConfigError::Validation(format!(
                "device_timeout_secs must be at least {}",
                MIN_DEVICE_TIMEOUT_SECS
            )));
        }
        if self.bridge_id.is_empty() {
            return Err(ConfigError::Validation(
                "bridge_id must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn device_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.device_timeout_secs))
    }

    /// Timeout triple sent to devices in registration and activity results.
    pub fn activity_timeout(&self) -> ActivityTimeout {
        ActivityTimeout::around(self.device_timeout_secs)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Copy with secrets masked, for display.
    pub fn redacted(&self) -> Self {
        Self {
            auth: self.auth.redacted(),
            ..self.clone()
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { name, value })
}
