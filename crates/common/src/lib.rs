//! Shared types for the TTS proxy workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::{Secret, redact};
