//! Error types for registry reads.

use alloy_primitives::U256;
use thiserror::Error;

/// Result type for registry reads
pub type Result<T> = std::result::Result<T, CrossError>;

/// Failure of a single contract call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct CallError(pub String);

impl CallError {
    /// Call error with a message
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Errors from reading the confirmations registry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CrossError {
    /// A length getter failed
    #[error("{method} failed: {source}")]
    Call {
        /// Contract method name
        method: &'static str,
        /// Underlying failure
        #[source]
        source: CallError,
    },

    /// An indexed getter failed part way through a listing
    #[error("{method}({index}) failed: {source}")]
    PaginationFailure {
        /// Contract method name
        method: &'static str,
        /// Index of the failing call
        index: u64,
        /// Underlying failure
        #[source]
        source: CallError,
    },

    /// The contract reported more entries than the reader accepts
    #[error("{method} returned {length}, above the limit of {limit}")]
    LengthTooLarge {
        /// Contract method name
        method: &'static str,
        /// Reported length
        length: U256,
        /// Configured limit
        limit: u64,
    },
}
