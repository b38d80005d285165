//! Capability tokens: folder share links and organization invite links.

use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use thiserror::Error;

use crate::model::{OrgInviteLink, ShareLink};

pub const TOKEN_LEN: usize = 32;

/// Why a link cannot be used right now.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum LinkRejection {
    #[error("This link has been disabled")]
    Disabled,
    #[error("This link has expired")]
    Expired,
    #[error("This link has reached its maximum uses")]
    Exhausted,
}

pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Shared usage rules for both link kinds.
pub trait Redeemable {
    fn is_disabled(&self) -> bool;
    fn expires_at(&self) -> Option<DateTime<Utc>>;
    fn max_uses(&self) -> Option<u32>;
    fn use_count(&self) -> u32;
    fn bump_use_count(&mut self);

    /// Deterministic for a given `now`.
    fn check_usable(&self, now: DateTime<Utc>) -> Result<(), LinkRejection> {
        if self.is_disabled() {
            return Err(LinkRejection::Disabled);
        }
        if self.expires_at().map_or(false, |exp| now >= exp) {
            return Err(LinkRejection::Expired);
        }
        if self.max_uses().map_or(false, |max| self.use_count() >= max) {
            return Err(LinkRejection::Exhausted);
        }
        Ok(())
    }

    fn remaining_uses(&self) -> Option<u32> {
        self.max_uses()
            .map(|max| max.saturating_sub(self.use_count()))
    }
}

macro_rules! impl_redeemable {
    ($ty:ty) => {
        impl Redeemable for $ty {
            fn is_disabled(&self) -> bool {
                self.is_disabled
            }

            fn expires_at(&self) -> Option<DateTime<Utc>> {
                self.expires_at
            }

            fn max_uses(&self) -> Option<u32> {
                self.max_uses
            }

            fn use_count(&self) -> u32 {
                self.use_count
            }

            fn bump_use_count(&mut self) {
                self.use_count = self.use_count.saturating_add(1);
            }
        }
    };
}

impl_redeemable!(ShareLink);
impl_redeemable!(OrgInviteLink);

/// Common validation for link creation parameters.
pub(crate) fn validate_limits(
    expires_at: Option<DateTime<Utc>>,
    max_uses: Option<u32>,
    now: DateTime<Utc>,
) -> crate::error::Result<()> {
    if max_uses == Some(0) {
        return Err(crate::error::HubError::invalid(
            "max_uses must be at least 1",
        ));
    }
    if expires_at.map_or(false, |exp| exp <= now) {
        return Err(crate::error::HubError::invalid(
            "expiry must be in the future",
        ));
    }
    Ok(())
}
