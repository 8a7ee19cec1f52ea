//! Error types for pool construction

/// Errors raised while building a pool.
///
/// Runtime conditions (no eligible key, unknown key in a report) are plain
/// return values and never show up here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no usable API keys configured")]
    NoKeys,

    #[error("invalid policy: {0}")]
    InvalidPolicy(String),
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
