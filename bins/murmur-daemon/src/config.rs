use murmur_api::{PeerProfile, UserId};
use murmur_core::config::CoreConfig;
use murmur_core::policy::Policy;
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

#[derive(Clone, Debug, Deserialize)]
pub struct MurmurConfig {
    pub identity: IdentityConfig,
    #[serde(default)]
    pub session: CoreConfig,
    #[serde(default)]
    pub policy: Policy,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub contacts: Vec<ContactConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct IdentityConfig {
    pub user_id: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

/// A peer seeded into the in-memory backend as a contact of the local user.
#[derive(Clone, Debug, Deserialize)]
pub struct ContactConfig {
    pub id: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
}

impl ContactConfig {
    pub fn profile(&self) -> PeerProfile {
        PeerProfile {
            full_name: self.full_name.clone(),
            account_id: self.account_id.clone(),
            ..PeerProfile::new(UserId::new(self.id.clone()))
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:9180".to_string()
}

fn default_level() -> String {
    "info".to_string()
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid: {0}")]
    Invalid(String),
}

impl MurmurConfig {
    pub fn local_user(&self) -> UserId {
        UserId::new(self.identity.user_id.trim())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.control
            .bind
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("control.bind {}", self.control.bind)))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.identity.user_id.trim().is_empty() {
            return Err(ConfigError::Invalid("identity.user_id is empty".to_string()));
        }
        if !self.bind_addr()?.ip().is_loopback() {
            return Err(ConfigError::Invalid(
                "control.bind must be a loopback address".to_string(),
            ));
        }
        let local = self.local_user();
        for contact in &self.contacts {
            if contact.id.trim().is_empty() {
                return Err(ConfigError::Invalid("contact id is empty".to_string()));
            }
            if contact.id.trim() == local.as_str() {
                return Err(ConfigError::Invalid(format!(
                    "{} cannot be its own contact",
                    local
                )));
            }
        }
        if self.session.event_bus_size == 0 {
            return Err(ConfigError::Invalid("session.event_bus_size is 0".to_string()));
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<MurmurConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: MurmurConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}
