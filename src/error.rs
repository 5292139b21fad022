//! Error types for session-guard
//!
//! Every failure is caught at the boundary of the public operation that
//! issued it and turned into a logged diagnostic plus a sentinel result.
//! These variants are what travels between internal layers up to that point.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// session-guard error types
#[derive(Error, Debug)]
pub enum Error {
    /// Durable store read/write failed or the store is unavailable
    #[error("Store error: {0}")]
    Store(String),

    /// Store rejected a write because its quota is exhausted
    #[error("Storage capacity exhausted: {used} of {capacity} bytes in use")]
    Capacity {
        /// Bytes currently in use
        used: usize,
        /// Configured capacity in bytes
        capacity: usize,
    },

    /// Snapshot could not be encoded
    #[error("Encode error: {0}")]
    Encode(String),

    /// Snapshot could not be decoded by any strategy
    #[error("Decode error: {0}")]
    Decode(String),

    /// A validation rule failed while evaluating
    #[error("Validation rule '{rule}' failed: {reason}")]
    Rule {
        /// Rule name
        rule: String,
        /// What went wrong
        reason: String,
    },

    /// Snapshot does not belong to the active participant or is malformed
    #[error("Data mismatch: {0}")]
    DataMismatch(String),

    /// Illegal phase transition
    #[error("Illegal phase transition: {from} -> {to}")]
    InvalidTransition {
        /// Phase the machine was in
        from: String,
        /// Phase that was requested
        to: String,
    },

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Config(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parse error
    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
