//! Secret wrapper and redaction for API keys

use std::fmt;
use zeroize::Zeroize;

/// Keys shorter than this are fully masked instead of showing a prefix.
const MIN_LEN_FOR_PREFIX: usize = 12;

/// Number of leading characters kept by [`redact`].
const PREFIX_LEN: usize = 4;

/// Sensitive value - redacted in Debug/Display/logs
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the inner value (use sparingly)
    pub fn expose(&self) -> &T {
        &self.0
    }
}

/// Reduce an API key to a short prefix safe to log.
///
/// `sk_0123456789abcdef` becomes `sk_0...`. Keys under 12 characters carry
/// too little entropy to show any of them and render as `***`.
pub fn redact(key: &str) -> String {
    if key.chars().count() < MIN_LEN_FOR_PREFIX {
        return "***".to_string();
    }
    let prefix: String = key.chars().take(PREFIX_LEN).collect();
    format!("{prefix}...")
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}
