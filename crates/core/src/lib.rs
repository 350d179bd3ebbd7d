//! # lightwire core
//!
//! Shared abstractions for the lightwire on-demand retrieval stack:
//!
//! - **Transport**: how a connected server is asked a question
//!   ([`ServerConnection`]) and how candidates are discovered and dialed
//!   ([`PoolTransport`]). The wire protocol lives behind these traits.
//! - **Persistence**: where peer reputation survives restarts
//!   ([`ReputationStore`]).
//! - **Cancellation**: a cloneable [`CancelToken`] handed to every component
//!   at construction and checked at each suspension point.
//!
//! Components depend on these traits, never on a concrete network or disk
//! implementation, so tests drive them with in-memory doubles.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]

pub mod cancel;
pub mod traits;

pub use cancel::CancelToken;
pub use traits::{
    // Storage
    ReputationStore, ReputationTable, StorageError, StorageResult,
    // Transport
    Capabilities, DiscoveredServer, PeerId, PoolTransport, ServerConnection, ServerInfo,
    TransportError, TransportResult,
};
