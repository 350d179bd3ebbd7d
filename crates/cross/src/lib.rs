//! # lightwire cross
//!
//! Read-only access to the confirmations registry of the cross-chain bridge.
//! The registry exposes its voter set, signer set and pending confirmation
//! list as a length getter plus an indexed getter each. Every call is pinned
//! to one block so a whole read sees a single consistent state.
//!
//! Calls are not retried here. The first failing call aborts the read and no
//! partial result is returned.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

mod confirmations;
mod error;

pub use confirmations::{
    difference, CallResult, ConfirmationRequest, ConfirmationsContract, ConfirmationsReader,
};
pub use error::{CallError, CrossError, Result};
