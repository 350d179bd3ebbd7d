//! Peer Quality Pool
//!
//! [`ServerPool`] owns every server address we know about: the trusted
//! allowlist plus candidates found through discovery. It keeps the reputation
//! table, dials candidates in the background up to a concurrency cap, backs
//! off exponentially on dial failures and evicts the worst untrusted candidate
//! when the pool grows past its configured size.
//!
//! Scores are pushed into the [`PeerSet`] whenever they change, so matching
//! reads them without touching the pool lock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use lightwire_config::{Config, PoolConfig};
use lightwire_core::{
    CancelToken, DiscoveredServer, PeerId, PoolTransport, ReputationStore, ServerConnection,
};
use lightwire_types::B256;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::peers::{Peer, PeerSet};
use crate::reputation::{Outcome, ReputationParams, ScoreTable};
use crate::{OdrError, Result};

/// Discovery topic for a chain and light protocol version.
///
/// ```
/// use lightwire_odr::les_topic;
/// use lightwire_types::B256;
///
/// let topic = les_topic(&B256::new([0xab; 32]), 2).unwrap();
/// assert_eq!(topic, "LES2@abababababababab");
/// assert!(les_topic(&B256::ZERO, 9).is_err());
/// ```
pub fn les_topic(genesis: &B256, protocol_version: u32) -> Result<String> {
    let name = match protocol_version {
        2 => "LES2",
        other => return Err(OdrError::UnsupportedProtocolVersion(other)),
    };
    Ok(format!("{}@{}", name, hex::encode(&genesis[..8])))
}

// ============================================================================
// Pool Entry
// ============================================================================

/// A known server address and its dial history.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolEntry {
    /// Server identity
    pub id: PeerId,
    /// Dial address, unknown for a trusted server not yet discovered
    pub addr: Option<String>,
    /// On the trusted allowlist
    pub trusted: bool,
    /// Reputation score
    pub score: f64,
    /// Last time a dial succeeded
    pub last_connected: Option<Instant>,
    /// Consecutive dial failures
    pub dial_failures: u32,
    /// Earliest time of the next dial attempt
    pub next_dial_at: Option<Instant>,
    /// Currently registered as a connected peer
    pub connected: bool,
    /// A dial is in progress
    pub dialing: bool,
}

impl PoolEntry {
    fn new(id: PeerId, addr: Option<String>, trusted: bool, score: f64) -> Self {
        Self {
            id,
            addr,
            trusted,
            score,
            last_connected: None,
            dial_failures: 0,
            next_dial_at: None,
            connected: false,
            dialing: false,
        }
    }

    fn is_dialable(&self, now: Instant) -> bool {
        self.addr.is_some()
            && !self.connected
            && !self.dialing
            && self.next_dial_at.map_or(true, |at| at <= now)
    }

    fn server(&self) -> Option<DiscoveredServer> {
        self.addr.as_ref().map(|addr| DiscoveredServer {
            id: self.id.clone(),
            addr: addr.clone(),
        })
    }
}

/// Pool statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Known candidates, trusted included
    pub candidates: usize,
    /// Candidates currently connected
    pub connected: usize,
    /// Dials in progress
    pub dialing: usize,
    /// Trusted candidates
    pub trusted: usize,
    /// Candidates waiting out a dial backoff
    pub backed_off: usize,
}

// ============================================================================
// Server Pool
// ============================================================================

struct PoolState {
    entries: HashMap<PeerId, PoolEntry>,
    scores: ScoreTable,
}

/// Candidate servers, dialing and reputation.
pub struct ServerPool {
    config: PoolConfig,
    light_peers: usize,
    default_capacity: usize,
    min_trusted_fraction: Option<f64>,
    trusted: HashSet<PeerId>,
    registry: Arc<PeerSet>,
    state: Mutex<PoolState>,
    cancel: CancelToken,
}

impl ServerPool {
    /// Build a pool seeded with the trusted allowlist from `config`.
    ///
    /// # Errors
    ///
    /// [`OdrError::Config`] if `config` fails validation or names a malformed
    /// trusted peer id.
    pub fn new(registry: Arc<PeerSet>, config: &Config, cancel: CancelToken) -> Result<Self> {
        config.validate().map_err(|e| OdrError::Config(e.to_string()))?;
        let trusted: HashSet<PeerId> = config
            .peers
            .trusted_ids()
            .map_err(|e| OdrError::Config(e.to_string()))?
            .into_iter()
            .collect();

        let scores = ScoreTable::new(ReputationParams::from(&config.reputation));
        let entries = trusted
            .iter()
            .map(|id| {
                let entry = PoolEntry::new(id.clone(), None, true, scores.score(id));
                (id.clone(), entry)
            })
            .collect();

        let min_trusted_fraction = if trusted.is_empty() {
            None
        } else {
            config.peers.min_trusted_fraction
        };

        Ok(Self {
            config: config.pool.clone(),
            light_peers: config.peers.light_peers,
            default_capacity: config.peers.default_capacity,
            min_trusted_fraction,
            trusted,
            registry,
            state: Mutex::new(PoolState { entries, scores }),
            cancel,
        })
    }

    /// Spawn the background discovery and dial loop.
    ///
    /// Runs one round per `dial_interval` until the pool's cancel token fires.
    /// Each round also decays scores through [`ServerPool::tick`].
    pub fn start(self: &Arc<Self>, transport: Arc<dyn PoolTransport>, topic: String) -> JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move {
            info!(%topic, "Server pool started");
            let mut interval = tokio::time::interval(pool.config.dial_interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = pool.cancel.cancelled() => break,
                    _ = interval.tick() => {
                        pool.dial_round(&transport, &topic).await;
                        pool.tick();
                    }
                }
            }
            info!("Server pool stopped");
        })
    }

    /// Run discovery once and start dials for every eligible candidate.
    pub async fn dial_round(self: &Arc<Self>, transport: &Arc<dyn PoolTransport>, topic: &str) {
        match transport.discover(topic).await {
            Ok(found) => {
                trace!(found = found.len(), "Discovery round");
                for server in found {
                    self.add_candidate(server);
                }
            }
            Err(e) => warn!(error = %e, "Discovery failed"),
        }

        for server in self.dial_candidates(Instant::now()) {
            let pool = self.clone();
            let transport = transport.clone();
            tokio::spawn(async move { pool.dial(transport, server).await });
        }
    }

    /// Pick candidates to dial now and mark them as dialing.
    ///
    /// Bounded by both `dial_concurrency` and the free `light_peers` slots.
    /// Trusted servers go first, then by score.
    pub fn dial_candidates(&self, now: Instant) -> Vec<DiscoveredServer> {
        let mut state = self.state.lock();
        let connected = state.entries.values().filter(|e| e.connected).count();
        let dialing = state.entries.values().filter(|e| e.dialing).count();
        let slots = self
            .config
            .dial_concurrency
            .saturating_sub(dialing)
            .min(self.light_peers.saturating_sub(connected + dialing));
        if slots == 0 {
            return Vec::new();
        }

        let mut ready: Vec<&PoolEntry> = state.entries.values().filter(|e| e.is_dialable(now)).collect();
        ready.sort_by(|a, b| {
            b.trusted
                .cmp(&a.trusted)
                .then_with(|| b.score.total_cmp(&a.score))
                .then_with(|| a.id.cmp(&b.id))
        });
        let chosen: Vec<PeerId> = ready.into_iter().take(slots).map(|e| e.id.clone()).collect();

        chosen
            .iter()
            .filter_map(|id| {
                let entry = state.entries.get_mut(id)?;
                entry.dialing = true;
                entry.server()
            })
            .collect()
    }

    async fn dial(self: Arc<Self>, transport: Arc<dyn PoolTransport>, server: DiscoveredServer) {
        debug!(peer = %server.id, addr = %server.addr, "Dialing server");
        let result = tokio::select! {
            _ = self.cancel.cancelled() => {
                self.clear_dialing(&server.id);
                return;
            }
            result = transport.dial(&server) => result,
        };

        match result {
            Ok(connection) => {
                self.clear_dialing(&server.id);
                if let Err(e) = self.on_connected(connection) {
                    warn!(peer = %server.id, error = %e, "Dialed server rejected");
                }
            }
            Err(e) => {
                let err = OdrError::DialFailure {
                    peer: server.id.clone(),
                    reason: e.to_string(),
                };
                debug!(error = %err, "Dial failed");
                self.report_outcome(&server.id, Outcome::DialFailure);
            }
        }
    }

    /// Register a freshly connected server and watch for its disconnect.
    pub fn on_connected(self: &Arc<Self>, connection: Arc<dyn ServerConnection>) -> Result<()> {
        let id = connection.info().id;
        let (trusted, score, was_connected) = {
            let mut state = self.state.lock();
            let score = state.scores.score(&id);
            let trusted = self.trusted.contains(&id);
            let entry = state
                .entries
                .entry(id.clone())
                .or_insert_with(|| PoolEntry::new(id.clone(), None, trusted, score));
            let was_connected = entry.connected;
            entry.connected = true;
            entry.dialing = false;
            entry.dial_failures = 0;
            entry.next_dial_at = None;
            entry.last_connected = Some(Instant::now());
            (trusted, score, was_connected)
        };

        let peer = Arc::new(Peer::new(connection.clone(), trusted, self.default_capacity, score));
        if let Err(e) = self.registry.register(peer) {
            // A duplicate leaves the registered connection in place.
            if !was_connected {
                if let Some(entry) = self.state.lock().entries.get_mut(&id) {
                    entry.connected = false;
                }
            }
            debug!(peer = %id, error = %e, "Rejected server connection");
            connection.disconnect();
            return Err(e);
        }
        info!(peer = %id, trusted, score, "Server connected");

        let pool = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = pool.cancel.cancelled() => {}
                _ = connection.closed() => pool.on_disconnected(&id),
            }
        });
        self.evict_over_capacity();
        Ok(())
    }

    /// Drop a server from the registry after its connection closed.
    pub fn on_disconnected(&self, id: &PeerId) {
        if let Some(entry) = self.state.lock().entries.get_mut(id) {
            entry.connected = false;
        }
        if self.registry.unregister(id).is_ok() {
            info!(peer = %id, "Server disconnected");
        }
    }

    /// Add or refresh a discovered candidate. Returns true if it was new.
    pub fn add_candidate(&self, server: DiscoveredServer) -> bool {
        let is_new = {
            let mut state = self.state.lock();
            let score = state.scores.score(&server.id);
            match state.entries.get_mut(&server.id) {
                Some(entry) => {
                    entry.addr = Some(server.addr);
                    false
                }
                None => {
                    let trusted = self.trusted.contains(&server.id);
                    trace!(peer = %server.id, addr = %server.addr, "New candidate");
                    let entry = PoolEntry::new(server.id.clone(), Some(server.addr), trusted, score);
                    state.entries.insert(server.id, entry);
                    true
                }
            }
        };
        if is_new {
            self.evict_over_capacity();
        }
        is_new
    }

    /// Record the result of an interaction with a peer and return its score.
    ///
    /// [`Outcome::DialFailure`] leaves the score alone: it bumps the dial
    /// failure counter, schedules the next dial with exponential backoff and
    /// drops an untrusted candidate that reached `max_dial_failures`.
    pub fn report_outcome(&self, id: &PeerId, outcome: Outcome) -> f64 {
        let score = {
            let mut state = self.state.lock();
            if outcome == Outcome::DialFailure {
                return self.record_dial_failure(&mut state, id);
            }
            let score = state.scores.apply(id, outcome);
            if let Some(entry) = state.entries.get_mut(id) {
                entry.score = score;
            }
            score
        };

        match outcome {
            Outcome::InvalidAnswer => warn!(peer = %id, score, "Peer sent invalid answer"),
            Outcome::Timeout => debug!(peer = %id, score, "Peer timed out"),
            _ => trace!(peer = %id, ?outcome, score, "Peer outcome"),
        }
        self.registry.set_score(id, score);
        score
    }

    fn record_dial_failure(&self, state: &mut PoolState, id: &PeerId) -> f64 {
        let score = state.scores.score(id);
        let Some(entry) = state.entries.get_mut(id) else {
            return score;
        };
        entry.dialing = false;
        entry.dial_failures += 1;
        let backoff = self.config.backoff(entry.dial_failures);
        entry.next_dial_at = Some(Instant::now() + backoff);

        if entry.dial_failures >= self.config.max_dial_failures && !entry.trusted {
            warn!(
                peer = %id,
                failures = entry.dial_failures,
                "Dropping candidate after repeated dial failures"
            );
            state.entries.remove(id);
        } else {
            debug!(peer = %id, failures = entry.dial_failures, ?backoff, "Dial backoff");
        }
        score
    }

    /// Remove the lowest-scoring untrusted candidate if the pool is over its
    /// configured size. A connected victim is also dropped from the registry
    /// and its connection is told to disconnect.
    pub fn evict_worst(&self) -> Option<PeerId> {
        let (victim, was_connected) = {
            let mut state = self.state.lock();
            if state.entries.len() <= self.config.max_candidates {
                return None;
            }
            let victim = state
                .entries
                .values()
                .filter(|e| !e.trusted)
                .min_by(|a, b| {
                    a.score
                        .total_cmp(&b.score)
                        .then_with(|| a.connected.cmp(&b.connected))
                        .then_with(|| b.id.cmp(&a.id))
                })?
                .id
                .clone();
            let entry = state.entries.remove(&victim)?;
            (victim, entry.connected)
        };

        warn!(peer = %victim, connected = was_connected, "Evicting worst candidate");
        if was_connected {
            if let Ok(peer) = self.registry.unregister(&victim) {
                peer.connection().disconnect();
            }
        }
        Some(victim)
    }

    fn evict_over_capacity(&self) {
        while self.evict_worst().is_some() {}
    }

    /// Whether requests must currently be served by trusted peers only.
    ///
    /// True while a minimum trusted fraction is configured and the trusted
    /// share of connected peers is below it.
    pub fn requires_trusted(&self) -> bool {
        let Some(fraction) = self.min_trusted_fraction else {
            return false;
        };
        let stats = self.registry.stats();
        if stats.peers == 0 {
            return fraction > 0.0;
        }
        (stats.trusted as f64 / stats.peers as f64) < fraction
    }

    /// Periodic maintenance: decay scores toward neutral, push them to the
    /// registry and evict over capacity.
    pub fn tick(&self) {
        let updates: Vec<(PeerId, f64)> = {
            let mut state = self.state.lock();
            state.scores.tick();
            let PoolState { entries, scores } = &mut *state;
            for entry in entries.values_mut() {
                entry.score = scores.score(&entry.id);
            }
            self.registry
                .snapshot()
                .peers
                .iter()
                .map(|p| (p.id().clone(), scores.score(p.id())))
                .collect()
        };
        for (id, score) in updates {
            self.registry.set_score(&id, score);
        }
        self.evict_over_capacity();
    }

    /// Current score for a peer, neutral if unknown
    pub fn score(&self, id: &PeerId) -> f64 {
        self.state.lock().scores.score(id)
    }

    /// Copy of a candidate entry
    pub fn entry(&self, id: &PeerId) -> Option<PoolEntry> {
        self.state.lock().entries.get(id).cloned()
    }

    /// Whether `id` is on the trusted allowlist
    pub fn is_trusted(&self, id: &PeerId) -> bool {
        self.trusted.contains(id)
    }

    /// Merge a persisted reputation table into the pool.
    pub async fn load_reputation(&self, store: &dyn ReputationStore) -> Result<usize> {
        let table = store.load().await?;
        let loaded = table.len();
        {
            let mut state = self.state.lock();
            state.scores.merge(table);
            let PoolState { entries, scores } = &mut *state;
            for entry in entries.values_mut() {
                entry.score = scores.score(&entry.id);
            }
        }
        for peer in self.registry.snapshot().peers {
            self.registry.set_score(peer.id(), self.score(peer.id()));
        }
        info!(entries = loaded, "Reputation table loaded");
        Ok(loaded)
    }

    /// Persist the reputation table.
    pub async fn save_reputation(&self, store: &dyn ReputationStore) -> Result<()> {
        let table = self.state.lock().scores.snapshot();
        store.save(&table).await?;
        debug!(entries = table.len(), "Reputation table saved");
        Ok(())
    }

    /// Pool statistics
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        let now = Instant::now();
        PoolStats {
            candidates: state.entries.len(),
            connected: state.entries.values().filter(|e| e.connected).count(),
            dialing: state.entries.values().filter(|e| e.dialing).count(),
            trusted: state.entries.values().filter(|e| e.trusted).count(),
            backed_off: state
                .entries
                .values()
                .filter(|e| e.next_dial_at.map_or(false, |at| at > now))
                .count(),
        }
    }

    fn clear_dialing(&self, id: &PeerId) {
        if let Some(entry) = self.state.lock().entries.get_mut(id) {
            entry.dialing = false;
        }
    }
}
