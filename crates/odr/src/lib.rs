//! # lightwire ODR
//!
//! On-demand retrieval for a node that keeps only block headers. State,
//! receipt and header data are fetched from full-node servers when needed and
//! every answer is verified locally against an already trusted header before
//! it is handed to the caller.
//!
//! ## Components
//!
//! | Component | Type | Role |
//! |-----------|------|------|
//! | Peer registry | [`PeerSet`] | connected servers, capability/head filtering, score ordering |
//! | Quality pool | [`ServerPool`] | discovery, dialing with backoff, reputation, trusted policy, eviction |
//! | Distributor | [`Distributor`] | matches pending requests to servers with free capacity |
//! | Retrieve manager | [`RetrieveManager`] | submit, validate, retry elsewhere, deadline, cancellation |
//! | ODR adapter | [`Odr`] | chain queries bound to header roots, pass-scoped cache |
//! | Service | [`LightOdrService`] | builds and wires all of the above from one [`Config`](lightwire_config::Config) |
//!
//! ## Data flow
//!
//! ```text
//! chain code -> Odr -> RetrieveManager -> Distributor -> ServerConnection::send
//!                            ^                 |
//!                            |   validate      v
//!                            +------------ raw answer
//! ```
//!
//! A rejected answer adds the server to the request's tried set, penalizes it
//! in the pool and resubmits the request. A request never visits the same
//! server twice.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod distributor;
pub mod odr;
pub mod peers;
pub mod pool;
pub mod proofs;
pub mod reputation;
pub mod retrieve;
pub mod service;
pub mod store;

pub use distributor::{DistEvent, DistRequest, Distributor, DistributorStats, RequestConstraint, RequestId};
pub use odr::{HeaderSource, Odr, OdrAnswer, OdrPass, OdrQuery, StateProofAnswer};
pub use peers::{Peer, PeerSet, PeerSetNotify, PeerSetSnapshot, PeerSetStats};
pub use pool::{les_topic, PoolEntry, PoolStats, ServerPool};
pub use proofs::{prove, state_leaf, MerkleProof, ProofStep};
pub use reputation::{Outcome, ReputationParams, ScoreTable};
pub use retrieve::{Request, RetrieveManager, ValidationError, Validator};
pub use service::{LightOdrService, ServiceStats};
pub use store::{FileReputationStore, MemoryReputationStore};

use lightwire_core::PeerId;
use thiserror::Error;

/// Result type for retrieval operations
pub type Result<T> = std::result::Result<T, OdrError>;

/// Errors surfaced by the retrieval stack
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OdrError {
    /// No connected server can serve the request any more
    #[error("no eligible peer")]
    NoEligiblePeer,

    /// The deadline passed before a valid answer arrived
    #[error("request timed out")]
    Timeout,

    /// The caller canceled the request
    #[error("request canceled")]
    Canceled,

    /// A server's answer failed validation. Retried internally, never
    /// returned from a retrieval.
    #[error("invalid answer from {peer}: {reason}")]
    InvalidAnswer {
        /// The offending server
        peer: PeerId,
        /// Validator message
        reason: String,
    },

    /// A candidate could not be dialed. Scored, never returned from a retrieval.
    #[error("dial failure for {peer}: {reason}")]
    DialFailure {
        /// The candidate
        peer: PeerId,
        /// Transport message
        reason: String,
    },

    /// The header a query depends on is not known locally
    #[error("unknown header: {0}")]
    UnknownHeader(String),

    /// A server with this identity is already registered
    #[error("peer already registered: {0}")]
    DuplicatePeer(PeerId),

    /// No server with this identity is registered
    #[error("peer not found: {0}")]
    PeerNotFound(PeerId),

    /// The retrieval stack has been stopped
    #[error("retrieval service shut down")]
    Shutdown,

    /// The reputation table could not be loaded or saved
    #[error("reputation store: {0}")]
    Store(String),

    /// A query or answer could not be encoded or decoded
    #[error("codec error: {0}")]
    Codec(String),

    /// The configuration could not be applied
    #[error("configuration error: {0}")]
    Config(String),

    /// No discovery topic exists for this protocol version
    #[error("unsupported protocol version: {0}")]
    UnsupportedProtocolVersion(u32),
}

impl From<lightwire_core::StorageError> for OdrError {
    fn from(err: lightwire_core::StorageError) -> Self {
        OdrError::Store(err.to_string())
    }
}
