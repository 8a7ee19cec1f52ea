//! Key pool state and best-key selection
//!
//! The pool owns one [`CredentialRecord`] per configured key, in configuration
//! order. Selection picks the eligible key with the lowest error metric under
//! the configured [`HealthPolicy`]; callers report each outcome back so later
//! selections steer away from failing keys.
//!
//! Membership is fixed at construction. All record state sits behind a single
//! `RwLock`, and every report is one read-modify-write under the write lock, so
//! concurrent reports never lose updates. Nothing here awaits I/O.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use common::{Secret, redact};

use crate::error::{Error, Result};
use crate::policy::{HealthPolicy, PolicyConfig};
use crate::record::CredentialRecord;
use crate::status::PoolStatus;

/// A key handed out by [`KeyPool::select`].
///
/// Selection does not reserve the key; other callers may receive it too.
#[derive(Debug, Clone)]
pub struct SelectedKey {
    secret: Secret<String>,
    label: String,
}

impl SelectedKey {
    /// Full key, for the upstream request header only.
    pub fn secret(&self) -> &str {
        self.secret.expose()
    }

    /// Redacted label, safe to log.
    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Pool of API keys with health tracking.
pub struct KeyPool {
    records: RwLock<Vec<CredentialRecord>>,
    policy: Arc<dyn HealthPolicy>,
}

impl KeyPool {
    /// Build a pool from raw configured keys.
    ///
    /// Entries are trimmed, blank entries dropped and duplicates collapsed to
    /// their first occurrence. Fails with [`Error::NoKeys`] when nothing is
    /// left.
    pub fn new<I, S>(keys: I, policy: Arc<dyn HealthPolicy>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut labels = HashSet::new();
        let mut records = Vec::new();

        for key in keys {
            let key = key.as_ref().trim();
            if key.is_empty() || !seen.insert(key.to_string()) {
                continue;
            }
            records.push(CredentialRecord::new(
                key.to_string(),
                unique_label(key, &mut labels),
            ));
        }
        // `seen` holds plain copies of every key; don't keep it around.
        drop(seen);

        if records.is_empty() {
            return Err(Error::NoKeys);
        }

        info!(keys = records.len(), policy = policy.name(), "key pool initialized");
        Ok(Self {
            records: RwLock::new(records),
            policy,
        })
    }

    /// Build a pool with the policy described by `config`.
    pub fn from_config<I, S>(keys: I, config: &PolicyConfig) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(keys, config.build()?)
    }

    /// Number of keys in the pool.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Select the healthiest eligible key.
    ///
    /// Keys whose cooldown has run out are reactivated first. Among eligible
    /// keys the lowest error metric wins, ties going to the earliest
    /// configured key. Returns `None` when no key is usable; callers turn
    /// that into a retry-later response.
    pub async fn select(&self) -> Option<SelectedKey> {
        let now = Instant::now();
        let mut records = self.records.write().await;
        let pool_size = records.len();

        for record in records.iter_mut() {
            self.reactivate(record, now);
        }

        let best = records
            .iter_mut()
            .filter(|r| self.policy.is_eligible(r, now))
            .min_by_key(|r| self.policy.error_metric(r));

        let Some(record) = best else {
            warn!(keys = pool_size, policy = self.policy.name(), "no eligible key, pool exhausted");
            metrics::counter!("key_pool_exhausted_total").increment(1);
            return None;
        };

        record.last_used_at = Some(now);
        metrics::counter!("key_pool_selections_total").increment(1);
        debug!(
            key = record.label(),
            errors = self.policy.error_metric(record),
            "key selected"
        );

        Some(SelectedKey {
            secret: record.secret().clone(),
            label: record.label().to_string(),
        })
    }

    /// Record a successful call made with `key`. Unknown keys are ignored.
    pub async fn report_success(&self, key: &str) {
        let mut records = self.records.write().await;
        let Some(record) = records.iter_mut().find(|r| r.matches(key)) else {
            return;
        };

        let had_errors = record.consecutive_error_count > 0;
        self.policy.on_success(record);
        if had_errors {
            debug!(
                key = record.label(),
                total_errors = record.total_error_count,
                "key recovered after errors"
            );
        }
    }

    /// Record a failed call made with `key`. Unknown keys are ignored.
    ///
    /// Counts the failure, keeps `message` as the key's last error and lets the
    /// policy demote the key once its threshold is reached.
    pub async fn report_error(&self, key: &str, message: impl Into<String>) {
        let now = Instant::now();
        let mut records = self.records.write().await;
        let Some(record) = records.iter_mut().find(|r| r.matches(key)) else {
            return;
        };

        // A late failure on an expired cooldown counts against the fresh window.
        self.reactivate(record, now);
        record.record_error(message.into());
        metrics::counter!("key_pool_errors_reported_total").increment(1);

        match self.policy.on_error(record, now) {
            Some(state) => {
                warn!(
                    key = record.label(),
                    state = state.label(),
                    policy = self.policy.name(),
                    total_errors = record.total_error_count,
                    consecutive_errors = record.consecutive_error_count,
                    last_error = record.last_error.as_deref().unwrap_or_default(),
                    "key taken out of rotation"
                );
                metrics::counter!("key_pool_keys_demoted_total", "state" => state.label())
                    .increment(1);
            }
            None => {
                debug!(
                    key = record.label(),
                    total_errors = record.total_error_count,
                    consecutive_errors = record.consecutive_error_count,
                    "key error recorded"
                );
            }
        }
    }

    fn reactivate(&self, record: &mut CredentialRecord, now: Instant) {
        if self.policy.try_reactivate(record, now) {
            info!(key = record.label(), "cooldown elapsed, key reactivated");
            metrics::counter!("key_pool_keys_reactivated_total").increment(1);
        }
    }

    /// Consistent snapshot of every key's health. Never contains a full key.
    pub async fn status(&self) -> PoolStatus {
        let records = self.records.read().await;
        PoolStatus::collect(self.policy.name(), &records, Instant::now())
    }
}

/// Redacted label for `key`, suffixed with `#n` when an earlier key already
/// produced the same label.
fn unique_label(key: &str, taken: &mut HashSet<String>) -> String {
    let base = redact(key);
    let mut label = base.clone();
    let mut n = 2;
    while !taken.insert(label.clone()) {
        label = format!("{base}#{n}");
        n += 1;
    }
    label
}
