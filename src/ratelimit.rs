//! Fixed-window throttle on claim attempts, keyed by identity.
//!
//! Sits in front of the coordinator: a rejected attempt never reaches the
//! store and never produces an audit entry.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::clock::Clock;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Attempts allowed per window.
    pub max_attempts: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window: Duration::seconds(60),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: DateTime<Utc>,
    attempts: u32,
}

pub struct RateLimiter {
    windows: DashMap<String, Window>,
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            config,
            clock,
        }
    }

    /// Count one attempt for `identity`, failing with `RateLimited` once the
    /// window's allowance is used up.
    pub fn check(&self, identity: &str) -> Result<()> {
        let now = self.clock.now();
        let mut entry = self.windows.entry(identity.to_string()).or_insert(Window {
            started: now,
            attempts: 0,
        });

        if now - entry.started >= self.config.window {
            *entry = Window {
                started: now,
                attempts: 0,
            };
        }

        if entry.attempts >= self.config.max_attempts {
            let retry_after = (entry.started + self.config.window - now)
                .to_std()
                .unwrap_or_default();
            return Err(Error::RateLimited {
                identity: identity.to_string(),
                retry_after,
            });
        }

        entry.attempts += 1;
        Ok(())
    }

    /// Drop windows that have fully elapsed. The lifecycle sweeper calls this
    /// on every tick.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.windows.len();
        self.windows.retain(|_, w| now - w.started < self.config.window);
        before - self.windows.len()
    }

    pub fn tracked_identities(&self) -> usize {
        self.windows.len()
    }
}
