//! Per-key health record

use common::Secret;
use tokio::time::Instant;

/// Selection state of a single key.
///
/// Which non-active state a key can reach depends on the policy:
/// `DisablePolicy` only ever produces `Disabled`, `CooldownPolicy` only
/// `CoolingDown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Active,
    /// Permanently excluded for the rest of the process lifetime.
    Disabled,
    /// Excluded until `until`, then reactivated by the next selection.
    CoolingDown { until: Instant },
}

impl KeyState {
    /// Status label for logs and the status snapshot.
    pub fn label(&self) -> &'static str {
        match self {
            KeyState::Active => "active",
            KeyState::Disabled => "disabled",
            KeyState::CoolingDown { .. } => "cooling_down",
        }
    }
}

/// Health bookkeeping for one configured key.
#[derive(Debug)]
pub struct CredentialRecord {
    secret: Secret<String>,
    label: String,
    pub state: KeyState,
    pub total_error_count: u32,
    /// Failures since the last reported success.
    pub consecutive_error_count: u32,
    pub last_used_at: Option<Instant>,
    pub last_error: Option<String>,
}

impl CredentialRecord {
    pub(crate) fn new(key: String, label: String) -> Self {
        Self {
            secret: Secret::new(key),
            label,
            state: KeyState::Active,
            total_error_count: 0,
            consecutive_error_count: 0,
            last_used_at: None,
            last_error: None,
        }
    }

    pub fn secret(&self) -> &Secret<String> {
        &self.secret
    }

    pub(crate) fn matches(&self, key: &str) -> bool {
        self.secret.expose() == key
    }

    /// Redacted label, unique within the pool.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_active(&self) -> bool {
        self.state == KeyState::Active
    }

    pub fn is_disabled_permanently(&self) -> bool {
        self.state == KeyState::Disabled
    }

    pub fn cooldown_until(&self) -> Option<Instant> {
        match self.state {
            KeyState::CoolingDown { until } => Some(until),
            _ => None,
        }
    }

    /// Count a failure against both counters.
    pub(crate) fn record_error(&mut self, message: String) {
        self.total_error_count = self.total_error_count.saturating_add(1);
        self.consecutive_error_count = self.consecutive_error_count.saturating_add(1);
        self.last_error = Some(message);
    }
}
