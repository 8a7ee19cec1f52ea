//! Key health policies
//!
//! A policy decides three things for the pool: which keys may be selected,
//! how eligible keys are ranked, and when a failing key is taken out of
//! rotation (and whether it ever comes back). Two policies ship:
//!
//! - [`DisablePolicy`]: rank by consecutive errors, disable a key for good once
//!   `consecutive_error_limit` failures happen in a row.
//! - [`CooldownPolicy`]: rank by total errors, park a key for
//!   `cooldown_period` once it accumulates `max_errors`, then reactivate it
//!   with clean counters. Successes slowly pay errors back.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::record::{CredentialRecord, KeyState};

/// Eligibility, ranking and demotion rules applied by [`crate::KeyPool`].
///
/// The pool updates `total_error_count`, `consecutive_error_count` and
/// `last_error` before calling [`HealthPolicy::on_error`]; policies only
/// decide what the new counts mean.
pub trait HealthPolicy: Send + Sync + fmt::Debug {
    /// Policy name for logs and the status snapshot.
    fn name(&self) -> &'static str;

    fn is_eligible(&self, record: &CredentialRecord, now: Instant) -> bool;

    /// Ranking key among eligible records; lowest wins.
    fn error_metric(&self, record: &CredentialRecord) -> u32;

    fn on_success(&self, record: &mut CredentialRecord);

    /// Apply demotion after a failure. Returns the new state when the key was
    /// taken out of rotation by this call.
    fn on_error(&self, record: &mut CredentialRecord, now: Instant) -> Option<KeyState>;

    /// Bring a demoted record back if its exclusion has run out.
    fn try_reactivate(&self, _record: &mut CredentialRecord, _now: Instant) -> bool {
        false
    }
}

/// Permanent disablement after consecutive failures.
#[derive(Debug, Clone)]
pub struct DisablePolicy {
    consecutive_error_limit: u32,
}

impl DisablePolicy {
    pub fn new(consecutive_error_limit: u32) -> Result<Self> {
        if consecutive_error_limit == 0 {
            return Err(Error::InvalidPolicy(
                "consecutive_error_limit must be greater than 0".into(),
            ));
        }
        Ok(Self {
            consecutive_error_limit,
        })
    }
}

impl HealthPolicy for DisablePolicy {
    fn name(&self) -> &'static str {
        "disable"
    }

    fn is_eligible(&self, record: &CredentialRecord, _now: Instant) -> bool {
        record.is_active()
    }

    fn error_metric(&self, record: &CredentialRecord) -> u32 {
        record.consecutive_error_count
    }

    fn on_success(&self, record: &mut CredentialRecord) {
        record.consecutive_error_count = 0;
    }

    fn on_error(&self, record: &mut CredentialRecord, _now: Instant) -> Option<KeyState> {
        if record.is_active() && record.consecutive_error_count >= self.consecutive_error_limit {
            record.state = KeyState::Disabled;
            return Some(KeyState::Disabled);
        }
        None
    }
}

/// Temporary exclusion after accumulated failures.
#[derive(Debug, Clone)]
pub struct CooldownPolicy {
    max_errors: u32,
    cooldown_period: Duration,
}

impl CooldownPolicy {
    pub fn new(max_errors: u32, cooldown_period: Duration) -> Result<Self> {
        if max_errors == 0 {
            return Err(Error::InvalidPolicy(
                "max_errors must be greater than 0".into(),
            ));
        }
        if cooldown_period.is_zero() {
            return Err(Error::InvalidPolicy(
                "cooldown_period_secs must be greater than 0".into(),
            ));
        }
        Ok(Self {
            max_errors,
            cooldown_period,
        })
    }
}

impl HealthPolicy for CooldownPolicy {
    fn name(&self) -> &'static str {
        "cooldown"
    }

    fn is_eligible(&self, record: &CredentialRecord, _now: Instant) -> bool {
        record.is_active()
    }

    fn error_metric(&self, record: &CredentialRecord) -> u32 {
        record.total_error_count
    }

    fn on_success(&self, record: &mut CredentialRecord) {
        record.consecutive_error_count = 0;
        record.total_error_count = record.total_error_count.saturating_sub(1);
    }

    fn on_error(&self, record: &mut CredentialRecord, now: Instant) -> Option<KeyState> {
        // A key already cooling down keeps its original deadline.
        if record.is_active() && record.total_error_count >= self.max_errors {
            let state = KeyState::CoolingDown {
                until: now + self.cooldown_period,
            };
            record.state = state;
            return Some(state);
        }
        None
    }

    fn try_reactivate(&self, record: &mut CredentialRecord, now: Instant) -> bool {
        match record.state {
            KeyState::CoolingDown { until } if now >= until => {
                record.state = KeyState::Active;
                record.total_error_count = 0;
                record.consecutive_error_count = 0;
                true
            }
            _ => false,
        }
    }
}

/// Which policy to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    #[default]
    Disable,
    Cooldown,
}

/// Policy settings as read from configuration.
///
/// Only the thresholds belonging to `policy` are used; the others keep their
/// defaults and are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub policy: PolicyKind,
    #[serde(default = "default_consecutive_error_limit")]
    pub consecutive_error_limit: u32,
    #[serde(default = "default_max_errors")]
    pub max_errors: u32,
    #[serde(default = "default_cooldown_period_secs")]
    pub cooldown_period_secs: u64,
}

fn default_consecutive_error_limit() -> u32 {
    2
}

fn default_max_errors() -> u32 {
    3
}

fn default_cooldown_period_secs() -> u64 {
    300
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            policy: PolicyKind::default(),
            consecutive_error_limit: default_consecutive_error_limit(),
            max_errors: default_max_errors(),
            cooldown_period_secs: default_cooldown_period_secs(),
        }
    }
}

impl PolicyConfig {
    /// Validate the thresholds and build the selected policy.
    pub fn build(&self) -> Result<Arc<dyn HealthPolicy>> {
        Ok(match self.policy {
            PolicyKind::Disable => Arc::new(DisablePolicy::new(self.consecutive_error_limit)?),
            PolicyKind::Cooldown => Arc::new(CooldownPolicy::new(
                self.max_errors,
                Duration::from_secs(self.cooldown_period_secs),
            )?),
        })
    }
}
