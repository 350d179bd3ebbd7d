//! Peer Registry
//!
//! [`PeerSet`] tracks the servers we currently hold a connection to. It is a
//! guarded, versioned map from identity to [`Peer`]: reads take a consistent
//! snapshot, and every add or remove bumps the version atomically with the
//! change. Components that hold per-peer work subscribe through
//! [`PeerSetNotify`] and are told about joins and losses after the change is
//! visible.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use lightwire_core::{Capabilities, PeerId, ServerConnection};
use lightwire_types::{BlockNumber, B256};
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::{OdrError, Result};

// ============================================================================
// Peer
// ============================================================================

/// Mutable per-peer fields.
#[derive(Debug, Clone, Copy)]
struct PeerState {
    head_number: BlockNumber,
    head_hash: B256,
    score: f64,
}

/// A connected server.
pub struct Peer {
    id: PeerId,
    capabilities: Capabilities,
    capacity: usize,
    trusted: bool,
    connection: Arc<dyn ServerConnection>,
    state: RwLock<PeerState>,
    /// Requests currently assigned. Only the distributor changes this.
    in_flight: AtomicUsize,
}

impl Peer {
    /// Build a peer from a finished handshake.
    ///
    /// `default_capacity` applies when the server announced no limit.
    pub fn new(
        connection: Arc<dyn ServerConnection>,
        trusted: bool,
        default_capacity: usize,
        score: f64,
    ) -> Self {
        let info = connection.info();
        Self {
            id: info.id,
            capabilities: info.capabilities,
            capacity: info.capacity.unwrap_or(default_capacity).max(1),
            trusted,
            connection,
            state: RwLock::new(PeerState {
                head_number: info.head_number,
                head_hash: info.head_hash,
                score,
            }),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Peer identity
    pub fn id(&self) -> &PeerId {
        &self.id
    }

    /// Advertised capability flags
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Maximum concurrent requests
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the peer is on the trusted allowlist
    pub fn is_trusted(&self) -> bool {
        self.trusted
    }

    /// Connection used to send requests
    pub fn connection(&self) -> &Arc<dyn ServerConnection> {
        &self.connection
    }

    /// Advertised head number and hash
    pub fn head(&self) -> (BlockNumber, B256) {
        let state = self.state.read();
        (state.head_number, state.head_hash)
    }

    /// Advertised head number
    pub fn head_number(&self) -> BlockNumber {
        self.state.read().head_number
    }

    /// Current reputation score as mirrored from the pool
    pub fn score(&self) -> f64 {
        self.state.read().score
    }

    /// Requests currently assigned to this peer
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Unused request slots
    pub fn free_capacity(&self) -> usize {
        self.capacity.saturating_sub(self.in_flight())
    }

    pub(crate) fn acquire_slot(&self) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn release_slot(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    fn set_score(&self, score: f64) {
        self.state.write().score = score;
    }

    fn set_head(&self, number: BlockNumber, hash: B256) {
        let mut state = self.state.write();
        state.head_number = number;
        state.head_hash = hash;
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("capabilities", &self.capabilities)
            .field("capacity", &self.capacity)
            .field("trusted", &self.trusted)
            .field("head", &self.head_number())
            .field("score", &self.score())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Receives peer join and loss events from a [`PeerSet`].
///
/// Called after the registry lock is released, so implementations may call
/// back into the registry.
pub trait PeerSetNotify: Send + Sync {
    /// A peer was registered.
    fn register_peer(&self, peer: &Arc<Peer>);

    /// A peer was removed. Any work assigned to it must be invalidated.
    fn unregister_peer(&self, peer: &Arc<Peer>);
}

#[derive(Default)]
struct PeerSetInner {
    peers: HashMap<PeerId, Arc<Peer>>,
    version: u64,
}

/// Consistent view of the registry at one version.
#[derive(Debug, Clone)]
pub struct PeerSetSnapshot {
    /// Registry version the snapshot was taken at
    pub version: u64,
    /// Registered peers
    pub peers: Vec<Arc<Peer>>,
}

/// Registry statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerSetStats {
    /// Registered peers
    pub peers: usize,
    /// Registered trusted peers
    pub trusted: usize,
    /// Requests in flight across all peers
    pub in_flight: usize,
    /// Current version
    pub version: u64,
}

/// The set of connected servers.
#[derive(Default)]
pub struct PeerSet {
    inner: RwLock<PeerSetInner>,
    listeners: RwLock<Vec<Weak<dyn PeerSetNotify>>>,
}

impl PeerSet {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to join/loss events. The registry holds a weak reference.
    pub fn subscribe(&self, listener: Weak<dyn PeerSetNotify>) {
        self.listeners.write().push(listener);
    }

    /// Add a peer. Fails if the identity is already present.
    pub fn register(&self, peer: Arc<Peer>) -> Result<()> {
        {
            let mut inner = self.inner.write();
            if inner.peers.contains_key(peer.id()) {
                return Err(OdrError::DuplicatePeer(peer.id().clone()));
            }
            inner.peers.insert(peer.id().clone(), peer.clone());
            inner.version += 1;
            debug!(
                peer = %peer.id(),
                head = peer.head_number(),
                capacity = peer.capacity(),
                trusted = peer.is_trusted(),
                version = inner.version,
                "Peer registered"
            );
        }

        for listener in self.live_listeners() {
            listener.register_peer(&peer);
        }
        Ok(())
    }

    /// Remove a peer and tell every listener it is gone.
    pub fn unregister(&self, id: &PeerId) -> Result<Arc<Peer>> {
        let peer = {
            let mut inner = self.inner.write();
            let peer = inner
                .peers
                .remove(id)
                .ok_or_else(|| OdrError::PeerNotFound(id.clone()))?;
            inner.version += 1;
            debug!(peer = %id, version = inner.version, "Peer unregistered");
            peer
        };

        for listener in self.live_listeners() {
            listener.unregister_peer(&peer);
        }
        Ok(peer)
    }

    /// Up to `n` peers satisfying `predicate`, best first.
    ///
    /// Ordered by descending score, then by fewest requests in flight, then by
    /// identity.
    pub fn best_peers<F>(&self, predicate: F, n: usize) -> Vec<Arc<Peer>>
    where
        F: Fn(&Peer) -> bool,
    {
        let mut peers: Vec<Arc<Peer>> = self
            .inner
            .read()
            .peers
            .values()
            .filter(|p| predicate(p))
            .cloned()
            .collect();

        peers.sort_by(|a, b| {
            b.score()
                .total_cmp(&a.score())
                .then_with(|| a.in_flight().cmp(&b.in_flight()))
                .then_with(|| a.id().cmp(b.id()))
        });
        peers.truncate(n);
        trace!(selected = peers.len(), "best_peers");
        peers
    }

    /// Number of peers satisfying `predicate`.
    pub fn count<F>(&self, predicate: F) -> usize
    where
        F: Fn(&Peer) -> bool,
    {
        self.inner.read().peers.values().filter(|p| predicate(p)).count()
    }

    /// Look up a peer by identity
    pub fn lookup(&self, id: &PeerId) -> Option<Arc<Peer>> {
        self.inner.read().peers.get(id).cloned()
    }

    /// Whether a peer is registered
    pub fn contains(&self, id: &PeerId) -> bool {
        self.inner.read().peers.contains_key(id)
    }

    /// All peers at the current version
    pub fn snapshot(&self) -> PeerSetSnapshot {
        let inner = self.inner.read();
        PeerSetSnapshot {
            version: inner.version,
            peers: inner.peers.values().cloned().collect(),
        }
    }

    /// Number of registered peers
    pub fn len(&self) -> usize {
        self.inner.read().peers.len()
    }

    /// Whether no peer is registered
    pub fn is_empty(&self) -> bool {
        self.inner.read().peers.is_empty()
    }

    /// Current version
    pub fn version(&self) -> u64 {
        self.inner.read().version
    }

    /// Mirror a pool score onto a registered peer. Returns false if absent.
    pub fn set_score(&self, id: &PeerId, score: f64) -> bool {
        match self.inner.read().peers.get(id) {
            Some(peer) => {
                peer.set_score(score);
                true
            }
            None => false,
        }
    }

    /// Record a new advertised head. Wakes listeners so waiting requests
    /// with a minimum head can match.
    pub fn set_head(&self, id: &PeerId, number: BlockNumber, hash: B256) -> Result<()> {
        let peer = self
            .lookup(id)
            .ok_or_else(|| OdrError::PeerNotFound(id.clone()))?;
        peer.set_head(number, hash);
        trace!(peer = %id, head = number, "Peer head updated");

        for listener in self.live_listeners() {
            listener.register_peer(&peer);
        }
        Ok(())
    }

    /// Registry statistics
    pub fn stats(&self) -> PeerSetStats {
        let inner = self.inner.read();
        PeerSetStats {
            peers: inner.peers.len(),
            trusted: inner.peers.values().filter(|p| p.is_trusted()).count(),
            in_flight: inner.peers.values().map(|p| p.in_flight()).sum(),
            version: inner.version,
        }
    }

    fn live_listeners(&self) -> Vec<Arc<dyn PeerSetNotify>> {
        let mut listeners = self.listeners.write();
        listeners.retain(|l| l.strong_count() > 0);
        listeners.iter().filter_map(Weak::upgrade).collect()
    }
}
