//! API key pool with health-based rotation
//!
//! Holds a fixed set of upstream API keys and hands out the healthiest one per
//! request. Callers report each outcome back; a pluggable [`HealthPolicy`]
//! turns those reports into rankings and demotions.
//!
//! Key lifecycle:
//! 1. Keys are loaded once at startup, blanks and duplicates dropped
//! 2. `select()` returns the eligible key with the fewest errors
//! 3. `report_error()` counts failures; at the policy threshold the key is
//!    disabled for good (`disable`) or parked for a cooldown (`cooldown`)
//! 4. `report_success()` clears the consecutive-failure streak
//! 5. Elapsed cooldowns are reactivated on the next `select()`
//!
//! Keys never leave the pool in clear text except through
//! [`SelectedKey::secret`]; logs and status output use a short redacted prefix.

pub mod error;
pub mod policy;
pub mod pool;
pub mod record;
pub mod status;

pub use error::{Error, Result};
pub use policy::{CooldownPolicy, DisablePolicy, HealthPolicy, PolicyConfig, PolicyKind};
pub use pool::{KeyPool, SelectedKey};
pub use record::{CredentialRecord, KeyState};
pub use status::{KeyStatus, PoolHealth, PoolStatus};
