//! Operational settings file.
//!
//! ```toml
//! [sweeper]
//! interval_secs = 300
//!
//! [claims]
//! max_active = 2
//! rate_limit = 5
//! rate_window_secs = 60
//! ```
//!
//! Every field is optional. The 24h/48h lifecycle cutoffs are not settable.

use std::path::Path;

use serde::Deserialize;

use crate::engine::{ClaimConfig, LifecycleConfig};
use crate::error::{Error, Result};
use crate::ratelimit::RateLimitConfig;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub sweeper: SweeperSettings,
    pub claims: ClaimSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SweeperSettings {
    pub interval_secs: u64,
}

impl Default for SweeperSettings {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClaimSettings {
    pub max_active: u32,
    pub rate_limit: u32,
    pub rate_window_secs: i64,
}

impl Default for ClaimSettings {
    fn default() -> Self {
        Self {
            max_active: 2,
            rate_limit: 5,
            rate_window_secs: 60,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read settings {}: {e}", path.display()))
        })?;
        Self::parse(&content)
            .map_err(|e| Error::Config(format!("bad settings {}: {e}", path.display())))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let settings: Settings =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.sweeper.interval_secs == 0 {
            return Err(Error::Config("sweeper.interval_secs must be > 0".to_string()));
        }
        if self.claims.max_active == 0 {
            return Err(Error::Config("claims.max_active must be > 0".to_string()));
        }
        if self.claims.rate_window_secs <= 0 {
            return Err(Error::Config(
                "claims.rate_window_secs must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn lifecycle(&self) -> LifecycleConfig {
        LifecycleConfig::with_interval(std::time::Duration::from_secs(self.sweeper.interval_secs))
    }

    pub fn claim(&self) -> ClaimConfig {
        ClaimConfig {
            max_active: self.claims.max_active,
        }
    }

    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_attempts: self.claims.rate_limit,
            window: chrono::Duration::seconds(self.claims.rate_window_secs),
        }
    }
}
