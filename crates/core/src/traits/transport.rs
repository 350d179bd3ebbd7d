//! Transport traits for talking to full-node servers.
//!
//! The retrieval engine never touches the wire encoding or handshake. It sees
//! a connected server as a [`ServerConnection`] (identity, advertised head,
//! capability flags, capacity, and a request/answer exchange) and reaches new
//! servers through a [`PoolTransport`] that can discover and dial them.

use async_trait::async_trait;
use bytes::Bytes;
use lightwire_types::{BlockNumber, B256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during network operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The peer is not connected.
    #[error("peer not connected: {0}")]
    PeerNotConnected(String),

    /// Connection to peer failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The request could not be sent or the answer never arrived.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Discovery could not be performed on a topic.
    #[error("discovery failed on {topic}: {reason}")]
    DiscoveryFailed {
        /// Discovery topic.
        topic: String,
        /// Underlying reason.
        reason: String,
    },

    /// A peer identity string could not be decoded.
    #[error("invalid peer id: {0}")]
    InvalidPeerId(String),

    /// The network is not running.
    #[error("network not running")]
    NotRunning,
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// A unique identifier for a network peer.
///
/// Identities are opaque byte strings. They display and serialize as base58.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub Bytes);

impl PeerId {
    /// Create a peer ID from raw bytes.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Get the raw bytes of the peer ID.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Convert to a base58 string representation.
    pub fn to_base58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }

    /// Parse a base58 string.
    pub fn from_base58(s: &str) -> TransportResult<Self> {
        if s.is_empty() {
            return Err(TransportError::InvalidPeerId("empty".into()));
        }
        bs58::decode(s)
            .into_vec()
            .map(Self::from_bytes)
            .map_err(|e| TransportError::InvalidPeerId(format!("{s}: {e}")))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

impl FromStr for PeerId {
    type Err = TransportError;

    fn from_str(s: &str) -> TransportResult<Self> {
        Self::from_base58(s)
    }
}

impl AsRef<[u8]> for PeerId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for PeerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_base58(&s).map_err(serde::de::Error::custom)
    }
}

/// Protocol capability flags advertised by a server.
///
/// Requests name the flags they need and the distributor filters on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(u8);

impl Capabilities {
    /// No capabilities.
    pub const NONE: Self = Self(0);
    /// Serves header ranges.
    pub const HEADERS: Self = Self(1 << 0);
    /// Serves state trie proofs.
    pub const STATE: Self = Self(1 << 1);
    /// Serves block receipts.
    pub const RECEIPTS: Self = Self(1 << 2);
    /// Everything a full server offers.
    pub const ALL: Self = Self(Self::HEADERS.0 | Self::STATE.0 | Self::RECEIPTS.0);

    /// Raw flag bits.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Build from raw bits, dropping unknown flags.
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    /// Whether every flag in `other` is also set here.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether no flag is set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Capabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// What a server told us about itself at handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    /// The server's identity.
    pub id: PeerId,
    /// Advertised head block number.
    pub head_number: BlockNumber,
    /// Advertised head block hash.
    pub head_hash: B256,
    /// Protocol capabilities.
    pub capabilities: Capabilities,
    /// Maximum concurrent requests the server accepts, if it announced one.
    pub capacity: Option<usize>,
}

/// A candidate server found through discovery or the static trusted list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredServer {
    /// The candidate's identity.
    pub id: PeerId,
    /// Address to dial.
    pub addr: String,
}

/// An established connection to one server.
///
/// # Example
///
/// ```ignore
/// use lightwire_core::{ServerConnection, TransportResult};
///
/// async fn ask(conn: &dyn ServerConnection, request: &[u8]) -> TransportResult<usize> {
///     let answer = conn.send(request).await?;
///     Ok(answer.len())
/// }
/// ```
#[async_trait]
pub trait ServerConnection: Send + Sync + 'static {
    /// Handshake information for this server.
    fn info(&self) -> ServerInfo;

    /// Send one encoded request and wait for the raw answer.
    async fn send(&self, request: &[u8]) -> TransportResult<Bytes>;

    /// Resolves once the connection has been closed by either side.
    async fn closed(&self) {
        std::future::pending::<()>().await
    }

    /// Ask the transport to drop this connection.
    ///
    /// Called by the pool when it stops using a server it is still connected
    /// to. Must not block; the transport tears the link down in the background.
    fn disconnect(&self) {}
}

/// Discovery and dialing of candidate servers.
#[async_trait]
pub trait PoolTransport: Send + Sync + 'static {
    /// Look up candidate servers advertising on a topic.
    async fn discover(&self, topic: &str) -> TransportResult<Vec<DiscoveredServer>>;

    /// Connect to a candidate and complete the handshake.
    async fn dial(&self, server: &DiscoveredServer) -> TransportResult<Arc<dyn ServerConnection>>;
}
