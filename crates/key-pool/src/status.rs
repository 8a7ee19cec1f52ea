//! Point-in-time pool snapshot for operators
//!
//! Keys appear only by their redacted label. The snapshot is plain data and
//! serializes straight to the JSON served on the status endpoint.

use serde::Serialize;
use tokio::time::Instant;

use crate::record::{CredentialRecord, KeyState};

/// Overall pool rating: every key usable, some usable, none usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

impl PoolHealth {
    pub fn label(&self) -> &'static str {
        match self {
            PoolHealth::Healthy => "healthy",
            PoolHealth::Degraded => "degraded",
            PoolHealth::Unhealthy => "unhealthy",
        }
    }
}

/// Observable health of one key.
#[derive(Debug, Clone, Serialize)]
pub struct KeyStatus {
    pub key: String,
    pub state: &'static str,
    pub active: bool,
    pub total_error_count: u32,
    pub consecutive_error_count: u32,
    /// `None` when the key was never selected.
    pub last_used_secs_ago: Option<u64>,
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_remaining_secs: Option<u64>,
}

impl KeyStatus {
    pub(crate) fn from_record(record: &CredentialRecord, now: Instant) -> Self {
        Self {
            key: record.label().to_string(),
            state: record.state.label(),
            active: record.is_active(),
            total_error_count: record.total_error_count,
            consecutive_error_count: record.consecutive_error_count,
            last_used_secs_ago: record
                .last_used_at
                .map(|t| now.saturating_duration_since(t).as_secs()),
            last_error: record.last_error.clone(),
            // Rounded up so a key reads as cooling until it is selectable.
            cooldown_remaining_secs: record
                .cooldown_until()
                .map(|until| until.saturating_duration_since(now).as_secs_f64().ceil() as u64),
        }
    }
}

/// Usable on the next selection: active, or cooling down with the window
/// already elapsed.
fn is_available(record: &CredentialRecord, now: Instant) -> bool {
    match record.state {
        KeyState::Active => true,
        KeyState::CoolingDown { until } => until <= now,
        KeyState::Disabled => false,
    }
}

/// Snapshot of the whole pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub status: PoolHealth,
    pub policy: &'static str,
    pub keys_total: usize,
    pub keys_available: usize,
    pub keys_active: usize,
    pub keys_cooling_down: usize,
    pub keys_disabled: usize,
    pub keys: Vec<KeyStatus>,
}

impl PoolStatus {
    pub(crate) fn collect(policy: &'static str, records: &[CredentialRecord], now: Instant) -> Self {
        let keys: Vec<KeyStatus> = records
            .iter()
            .map(|r| KeyStatus::from_record(r, now))
            .collect();

        let (mut keys_active, mut keys_cooling_down, mut keys_disabled) = (0usize, 0usize, 0usize);
        for record in records {
            match record.state {
                KeyState::Active => keys_active += 1,
                KeyState::CoolingDown { .. } => keys_cooling_down += 1,
                KeyState::Disabled => keys_disabled += 1,
            }
        }
        let keys_available = records.iter().filter(|r| is_available(r, now)).count();
        let keys_total = keys.len();

        let status = if keys_total > 0 && keys_available == keys_total {
            PoolHealth::Healthy
        } else if keys_available > 0 {
            PoolHealth::Degraded
        } else {
            PoolHealth::Unhealthy
        };

        Self {
            status,
            policy,
            keys_total,
            keys_available,
            keys_active,
            keys_cooling_down,
            keys_disabled,
            keys,
        }
    }
}
