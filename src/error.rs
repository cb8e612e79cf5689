//! Error types for the contract engine.
//!
//! Document-level failures (unreadable contracts, ill-formed documents,
//! listener startup) are `ContractError` and abort before any interaction
//! runs. Per-interaction failures are never errors: they are captured as
//! mismatches inside the verification report or mock server verdict.

use thiserror::Error;

/// Errors raised by the contract engine.
#[derive(Error, Debug)]
pub enum ContractError {
    /// Contract document could not be parsed
    #[error("Failed to parse contract document: {0}")]
    Parse(String),

    /// Two interactions share the same description
    #[error("Duplicate interaction description: {0}")]
    DuplicateDescription(String),

    /// Regex matcher pattern failed to compile
    #[error("Invalid regex pattern '{pattern}': {reason}")]
    InvalidRegex {
        /// The offending pattern
        pattern: String,
        /// Compiler diagnostic
        reason: String,
    },

    /// Configuration error (bad base URL, empty participant name, ...)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Mock server could not bind or start its listener
    #[error("Mock server startup failed: {0}")]
    Startup(String),

    /// Filesystem error from the contract store
    #[error("Contract store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error while writing a contract
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client construction failed
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ContractError {
    /// Create a parse error.
    #[must_use]
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a startup error.
    #[must_use]
    pub fn startup(msg: impl Into<String>) -> Self {
        Self::Startup(msg.into())
    }
}

/// Result type for contract engine operations.
pub type ContractResult<T> = Result<T, ContractError>;
