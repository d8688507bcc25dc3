//! Typed configuration.
//!
//! Connection details and secrets come from the environment and are loaded
//! once at startup, failing fast if required vars are missing. Operational
//! knobs (sweep interval, claim limits) live in an optional TOML settings file.

pub mod settings;

pub use settings::Settings;

use crate::error::{Error, Result};
use secrecy::SecretString;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// Path to a TOML [`Settings`] file, if any.
    pub settings_path: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            settings_path: std::env::var("COSMOS_SETTINGS").ok(),
        })
    }

    /// Operational settings: the file named by `COSMOS_SETTINGS`, or defaults.
    pub fn settings(&self) -> Result<Settings> {
        match self.settings_path {
            Some(ref path) => Settings::load(std::path::Path::new(path)),
            None => Ok(Settings::default()),
        }
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}
