//! Error handling for harmonic-bus
//!
//! This module defines the error taxonomy of the orchestrator and a Result
//! alias for use throughout the crate.
//!
//! Validation and registration errors are raised synchronously to callers of
//! `send`/`register_node`. Node tick failures never show up here: they are
//! contained by the tick loop and recorded in node stats and the event log.

use crate::bus::types::TypeTag;
use thiserror::Error;

/// Main error type for harmonic-bus operations
#[derive(Error, Debug)]
pub enum BusError {
    /// A payload failed its port's type predicate or schema
    #[error("Validation error ({tag}): {reason}")]
    Validation { tag: TypeTag, reason: String },

    /// An object passed to `register_node` does not satisfy the node contract
    #[error("Registration error: {0}")]
    Registration(String),

    /// Errors raised by the durable store
    #[error("Store error: {0}")]
    Store(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to channel communication with the loop thread
    #[error("Channel error: {0}")]
    Channel(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<BusError>,
    },
}

impl BusError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        BusError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error (or the error it wraps) is a validation failure
    pub fn is_validation(&self) -> bool {
        match self {
            BusError::Validation { .. } => true,
            BusError::WithContext { source, .. } => source.is_validation(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        BusError::Serialization(err.to_string())
    }
}

/// Result type alias for harmonic-bus operations
pub type Result<T> = std::result::Result<T, BusError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BusError::Registration("duplicate node id 'a'".to_string());
        assert_eq!(err.to_string(), "Registration error: duplicate node id 'a'");
    }

    #[test]
    fn test_validation_display_names_tag() {
        let err = BusError::Validation {
            tag: TypeTag::Text,
            reason: "expected a string".to_string(),
        };
        assert!(err.to_string().contains("text"));
        assert!(err.to_string().contains("expected a string"));
    }

    #[test]
    fn test_error_with_context() {
        let err = BusError::Store("disk full".to_string());
        let with_ctx = err.with_context("Failed to flush");
        assert!(with_ctx.to_string().contains("Failed to flush"));
        assert!(!with_ctx.is_validation());
    }

    #[test]
    fn test_is_validation_through_context() {
        let err = BusError::Validation {
            tag: TypeTag::Vector,
            reason: "not numeric".to_string(),
        };
        let wrapped: Result<()> = Err(err);
        let wrapped = wrapped.context("send to 'v.in'").unwrap_err();
        assert!(wrapped.is_validation());
    }
}
