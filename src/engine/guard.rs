//! Per-user cap on concurrently held tasks.
//!
//! The guard is a cheap pre-check that rejects a claim before any write is
//! attempted. On its own it is racy: two claims by one user can both read a
//! count of 1 and both proceed. The binding enforcement is the `max_active`
//! argument to [`TaskStore::claim`], which re-counts inside the store's atomic
//! step.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::model::UserId;
use crate::store::TaskStore;

#[derive(Clone)]
pub struct ActiveClaimGuard {
    store: Arc<dyn TaskStore>,
    max_active: u32,
}

impl ActiveClaimGuard {
    pub fn new(store: Arc<dyn TaskStore>, max_active: u32) -> Self {
        Self { store, max_active }
    }

    pub fn max_active(&self) -> u32 {
        self.max_active
    }

    /// Number of tasks `user` holds in `IN_PROGRESS`. Pure read.
    pub async fn count_active(&self, user: &UserId) -> Result<u64> {
        self.store.count_active(user).await
    }

    /// Fail with `LimitExceeded` if `user` is already at the cap.
    pub async fn check(&self, user: &UserId) -> Result<()> {
        let active = self.count_active(user).await?;
        if active >= u64::from(self.max_active) {
            return Err(Error::LimitExceeded {
                user: user.clone(),
                active,
                limit: self.max_active,
            });
        }
        Ok(())
    }
}
