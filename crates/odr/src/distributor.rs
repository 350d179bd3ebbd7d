//! Request Distributor
//!
//! The matching engine between pending requests and connected peers. All
//! matching decisions and all peer capacity accounting happen under one
//! lock, so two requests can never take the same unit of capacity. The
//! network exchange itself runs in its own task per assignment and reports
//! back through [`Distributor::deliver`], never holding the lock while it
//! waits.
//!
//! Matching is re-run on every trigger: a new submission, freed capacity, a
//! peer joining or advancing its head, and a peer leaving.
//!
//! Each submission is one attempt. It ends with exactly one terminal event
//! ([`DistEvent::Answer`] or [`DistEvent::NoPeers`]) or with
//! [`Distributor::cancel`]. Retrying elsewhere is the caller's job.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use lightwire_core::{Capabilities, PeerId, TransportResult};
use lightwire_types::BlockNumber;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

use crate::peers::{Peer, PeerSet, PeerSetNotify};
use crate::{OdrError, Result};

/// Identifier of one submission
pub type RequestId = u64;

// ============================================================================
// Requests
// ============================================================================

/// Which peers may serve a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestConstraint {
    /// Capability flags the peer must advertise
    pub capabilities: Capabilities,
    /// Lowest acceptable advertised head
    pub min_head: Option<BlockNumber>,
    /// Only trusted peers may serve
    pub trusted_only: bool,
}

impl RequestConstraint {
    /// Constraint on capabilities only
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            ..Self::default()
        }
    }

    /// Require a minimum advertised head
    pub fn with_min_head(mut self, head: BlockNumber) -> Self {
        self.min_head = Some(head);
        self
    }

    /// Whether `peer` satisfies capability, head and trust requirements
    pub fn allows(&self, peer: &Peer) -> bool {
        peer.capabilities().contains(self.capabilities)
            && self.min_head.map_or(true, |h| peer.head_number() >= h)
            && (!self.trusted_only || peer.is_trusted())
    }
}

/// One submission to the distributor.
#[derive(Debug, Clone)]
pub struct DistRequest {
    /// Logical request this attempt belongs to. A peer never serves two
    /// attempts of the same logical request at once.
    pub logical_id: u64,
    /// Encoded query
    pub payload: Bytes,
    /// Eligibility constraint
    pub constraint: RequestConstraint,
    /// Peers this logical request has already visited
    pub tried: HashSet<PeerId>,
}

/// Progress of a submission, delivered in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DistEvent {
    /// The request was handed to a peer
    Assigned(PeerId),
    /// The assigned peer disconnected and the request went back to pending
    PeerLost(PeerId),
    /// The assigned peer answered. Terminal.
    Answer {
        /// Peer that answered
        peer: PeerId,
        /// Raw answer or transport failure
        result: TransportResult<Bytes>,
    },
    /// Every remaining eligible peer has been tried. Terminal.
    NoPeers,
}

/// Distributor statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributorStats {
    /// Requests waiting for a peer
    pub pending: usize,
    /// Requests assigned to a peer
    pub in_flight: usize,
}

// ============================================================================
// Distributor
// ============================================================================

struct Assignment {
    peer: Arc<Peer>,
    task: AbortHandle,
}

struct Entry {
    request: DistRequest,
    events: mpsc::UnboundedSender<DistEvent>,
    assigned: Option<Assignment>,
}

#[derive(Default)]
struct DistState {
    pending: VecDeque<RequestId>,
    entries: HashMap<RequestId, Entry>,
    /// (peer, logical id) pairs currently in flight
    serving: HashSet<(PeerId, u64)>,
    next_id: RequestId,
    closed: bool,
}

/// Matches pending requests to peers with free capacity.
pub struct Distributor {
    registry: Arc<PeerSet>,
    state: Mutex<DistState>,
    this: Weak<Distributor>,
}

impl Distributor {
    /// Create a distributor and subscribe it to registry events.
    pub fn new(registry: Arc<PeerSet>) -> Arc<Self> {
        let distributor = Arc::new_cyclic(|this| Self {
            registry: registry.clone(),
            state: Mutex::new(DistState::default()),
            this: this.clone(),
        });
        let listener: Arc<dyn PeerSetNotify> = distributor.clone();
        registry.subscribe(Arc::downgrade(&listener));
        distributor
    }

    /// Submit a request.
    ///
    /// Returns its id and the event stream. If the request has already tried
    /// peers and none of the remaining registered peers could ever serve it,
    /// the stream yields [`DistEvent::NoPeers`] at once.
    pub fn queue(&self, request: DistRequest) -> Result<(RequestId, mpsc::UnboundedReceiver<DistEvent>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        if state.closed {
            return Err(OdrError::Shutdown);
        }

        let id = state.next_id;
        state.next_id += 1;

        if !request.tried.is_empty() && !self.has_candidate(&request) {
            debug!(request = id, tried = request.tried.len(), "No untried eligible peer");
            let _ = tx.send(DistEvent::NoPeers);
            return Ok((id, rx));
        }

        trace!(request = id, logical = request.logical_id, "Request queued");
        state.entries.insert(
            id,
            Entry {
                request,
                events: tx,
                assigned: None,
            },
        );
        state.pending.push_back(id);
        self.rematch(&mut state);
        Ok((id, rx))
    }

    /// Withdraw a request, pending or in flight.
    ///
    /// An in-flight exchange is aborted and its capacity released at once.
    /// Returns false if the request had already finished.
    pub fn cancel(&self, id: RequestId) -> bool {
        let mut state = self.state.lock();
        let Some(entry) = state.entries.remove(&id) else {
            return false;
        };
        state.pending.retain(|pending| *pending != id);
        let freed = entry.assigned.is_some();
        if let Some(assignment) = entry.assigned {
            assignment.task.abort();
            state
                .serving
                .remove(&(assignment.peer.id().clone(), entry.request.logical_id));
            assignment.peer.release_slot();
        }
        trace!(request = id, freed, "Request canceled");
        if freed {
            self.rematch(&mut state);
        }
        true
    }

    /// Hand a peer's answer back to its request and free the capacity.
    ///
    /// Ignored if the request was canceled or reassigned meanwhile.
    pub fn deliver(&self, id: RequestId, peer: &PeerId, result: TransportResult<Bytes>) {
        let mut state = self.state.lock();
        let matches = state
            .entries
            .get(&id)
            .and_then(|e| e.assigned.as_ref())
            .map_or(false, |a| a.peer.id() == peer);
        if !matches {
            trace!(request = id, %peer, "Stale answer dropped");
            return;
        }

        if let Some(entry) = state.entries.remove(&id) {
            if let Some(assignment) = entry.assigned {
                state
                    .serving
                    .remove(&(assignment.peer.id().clone(), entry.request.logical_id));
                assignment.peer.release_slot();
            }
            trace!(request = id, %peer, ok = result.is_ok(), "Answer delivered");
            let _ = entry.events.send(DistEvent::Answer {
                peer: peer.clone(),
                result,
            });
        }
        self.rematch(&mut state);
    }

    /// Stop accepting requests and abort everything outstanding. Event
    /// streams of outstanding requests close without a terminal event.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.pending.clear();
        let outstanding = state.entries.len();
        for (_, entry) in state.entries.drain() {
            if let Some(assignment) = entry.assigned {
                assignment.task.abort();
                assignment.peer.release_slot();
            }
        }
        state.serving.clear();
        debug!(outstanding, "Distributor shut down");
    }

    /// Distributor statistics
    pub fn stats(&self) -> DistributorStats {
        let state = self.state.lock();
        DistributorStats {
            pending: state.pending.len(),
            in_flight: state.entries.len() - state.pending.len(),
        }
    }

    /// Whether some registered peer could serve `request`, ignoring capacity.
    fn has_candidate(&self, request: &DistRequest) -> bool {
        self.registry
            .count(|p| request.constraint.allows(p) && !request.tried.contains(p.id()))
            > 0
    }

    /// Assign every pending request that has an eligible peer, in queue order.
    fn rematch(&self, state: &mut DistState) {
        if state.closed || state.pending.is_empty() {
            return;
        }
        let peers = self.registry.snapshot().peers;
        let mut still_pending = VecDeque::with_capacity(state.pending.len());

        while let Some(id) = state.pending.pop_front() {
            let Some(entry) = state.entries.get(&id) else {
                continue;
            };
            match select_peer(&peers, &entry.request, &state.serving) {
                Some(peer) => self.assign(state, id, peer),
                None => still_pending.push_back(id),
            }
        }
        state.pending = still_pending;
    }

    fn assign(&self, state: &mut DistState, id: RequestId, peer: Arc<Peer>) {
        let Some(entry) = state.entries.get_mut(&id) else {
            return;
        };
        peer.acquire_slot();
        entry.request.tried.insert(peer.id().clone());
        state
            .serving
            .insert((peer.id().clone(), entry.request.logical_id));

        let payload = entry.request.payload.clone();
        let task_peer = peer.clone();
        let this = self.this.clone();
        let task = tokio::spawn(async move {
            let result = task_peer.connection().send(&payload).await;
            if let Some(distributor) = this.upgrade() {
                distributor.deliver(id, task_peer.id(), result);
            }
        });

        debug!(
            request = id,
            peer = %peer.id(),
            score = peer.score(),
            in_flight = peer.in_flight(),
            "Request assigned"
        );
        let _ = entry.events.send(DistEvent::Assigned(peer.id().clone()));
        entry.assigned = Some(Assignment {
            peer,
            task: task.abort_handle(),
        });
    }
}

/// Best eligible peer: highest score, then most free capacity, then lowest id.
fn select_peer(
    peers: &[Arc<Peer>],
    request: &DistRequest,
    serving: &HashSet<(PeerId, u64)>,
) -> Option<Arc<Peer>> {
    peers
        .iter()
        .filter(|p| {
            request.constraint.allows(p)
                && !request.tried.contains(p.id())
                && p.free_capacity() > 0
                && !serving.contains(&(p.id().clone(), request.logical_id))
        })
        .max_by(|a, b| {
            a.score()
                .total_cmp(&b.score())
                .then_with(|| a.free_capacity().cmp(&b.free_capacity()))
                .then_with(|| b.id().cmp(a.id()))
        })
        .cloned()
}

impl PeerSetNotify for Distributor {
    fn register_peer(&self, peer: &Arc<Peer>) {
        trace!(peer = %peer.id(), "Rematching after peer joined");
        let mut state = self.state.lock();
        self.rematch(&mut state);
    }

    fn unregister_peer(&self, peer: &Arc<Peer>) {
        let mut state = self.state.lock();
        let lost: Vec<RequestId> = state
            .entries
            .iter()
            .filter(|(_, e)| {
                e.assigned
                    .as_ref()
                    .map_or(false, |a| Arc::ptr_eq(&a.peer, peer))
            })
            .map(|(id, _)| *id)
            .collect();

        for id in lost {
            let Some(mut entry) = state.entries.remove(&id) else {
                continue;
            };
            if let Some(assignment) = entry.assigned.take() {
                assignment.task.abort();
                assignment.peer.release_slot();
                state
                    .serving
                    .remove(&(assignment.peer.id().clone(), entry.request.logical_id));
            }
            let _ = entry.events.send(DistEvent::PeerLost(peer.id().clone()));

            if self.has_candidate(&entry.request) {
                debug!(request = id, peer = %peer.id(), "Requeued after peer loss");
                state.entries.insert(id, entry);
                state.pending.push_front(id);
            } else {
                warn!(request = id, peer = %peer.id(), "Peer lost and no eligible peer remains");
                let _ = entry.events.send(DistEvent::NoPeers);
            }
        }
        self.rematch(&mut state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lightwire_core::{ServerConnection, ServerInfo};
    use lightwire_types::B256;
    use std::time::Duration;

    struct Slow {
        info: ServerInfo,
    }

    #[async_trait]
    impl ServerConnection for Slow {
        fn info(&self) -> ServerInfo {
            self.info.clone()
        }

        async fn send(&self, request: &[u8]) -> TransportResult<Bytes> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Bytes::copy_from_slice(request))
        }
    }

    fn peer(n: u8, capacity: usize, caps: Capabilities) -> Arc<Peer> {
        let info = ServerInfo {
            id: PeerId::from_bytes(vec![n]),
            head_number: 100,
            head_hash: B256::ZERO,
            capabilities: caps,
            capacity: Some(capacity),
        };
        Arc::new(Peer::new(Arc::new(Slow { info }), false, 1, 50.0))
    }

    fn request(logical_id: u64, caps: Capabilities) -> DistRequest {
        DistRequest {
            logical_id,
            payload: Bytes::from_static(b"q"),
            constraint: RequestConstraint::new(caps),
            tried: HashSet::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_is_never_oversubscribed() {
        let registry = Arc::new(PeerSet::new());
        let distributor = Distributor::new(registry.clone());
        registry.register(peer(1, 2, Capabilities::ALL)).unwrap();

        let mut streams = Vec::new();
        for logical in 0..5 {
            streams.push(distributor.queue(request(logical, Capabilities::STATE)).unwrap());
        }

        assert_eq!(registry.lookup(&PeerId::from_bytes(vec![1])).unwrap().in_flight(), 2);
        assert_eq!(
            distributor.stats(),
            DistributorStats {
                pending: 3,
                in_flight: 2
            }
        );

        let (first, _) = &streams[0];
        assert!(distributor.cancel(*first));
        assert_eq!(distributor.stats().pending, 2);
        assert_eq!(registry.lookup(&PeerId::from_bytes(vec![1])).unwrap().in_flight(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capability_filter_and_join_trigger() {
        let registry = Arc::new(PeerSet::new());
        let distributor = Distributor::new(registry.clone());
        registry.register(peer(1, 4, Capabilities::HEADERS)).unwrap();

        let (_, mut events) = distributor.queue(request(7, Capabilities::RECEIPTS)).unwrap();
        assert_eq!(distributor.stats().pending, 1);

        registry.register(peer(2, 4, Capabilities::ALL)).unwrap();
        assert_eq!(
            events.recv().await,
            Some(DistEvent::Assigned(PeerId::from_bytes(vec![2])))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_loss_requeues_or_gives_up() {
        let registry = Arc::new(PeerSet::new());
        let distributor = Distributor::new(registry.clone());
        registry.register(peer(1, 1, Capabilities::ALL)).unwrap();

        let (_, mut events) = distributor.queue(request(1, Capabilities::STATE)).unwrap();
        assert!(matches!(events.recv().await, Some(DistEvent::Assigned(_))));

        registry.unregister(&PeerId::from_bytes(vec![1])).unwrap();
        assert!(matches!(events.recv().await, Some(DistEvent::PeerLost(_))));
        assert_eq!(events.recv().await, Some(DistEvent::NoPeers));
        assert_eq!(distributor.stats(), DistributorStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_logical_request_not_doubled_on_peer() {
        let registry = Arc::new(PeerSet::new());
        let distributor = Distributor::new(registry.clone());
        registry.register(peer(1, 4, Capabilities::ALL)).unwrap();

        let (_, mut a) = distributor.queue(request(3, Capabilities::STATE)).unwrap();
        let (_, _b) = distributor.queue(request(3, Capabilities::STATE)).unwrap();
        assert!(matches!(a.recv().await, Some(DistEvent::Assigned(_))));
        assert_eq!(distributor.stats().pending, 1);
    }

    #[tokio::test]
    async fn test_queue_after_shutdown() {
        let registry = Arc::new(PeerSet::new());
        let distributor = Distributor::new(registry);
        distributor.shutdown();
        assert!(matches!(
            distributor.queue(request(1, Capabilities::NONE)),
            Err(OdrError::Shutdown)
        ));
    }
}
