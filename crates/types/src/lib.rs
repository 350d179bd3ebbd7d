//! # lightwire types
//!
//! Fundamental types shared across the lightwire crates:
//! - [`B256`] and [`keccak256`] from `alloy-primitives` for hashes and roots
//! - [`LightHeader`] - the verified header fields a header-only node keeps
//! - [`Receipt`] and [`receipts_root`] - receipt commitments checked by on-demand retrieval

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod header;

pub use alloy_primitives::{keccak256, B256};
pub use header::{keccak256_concat, ordered_root, receipts_root, BlockNumber, LightHeader, Receipt};
