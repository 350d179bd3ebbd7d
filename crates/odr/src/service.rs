//! Light ODR Service
//!
//! Builds the retrieval stack from a [`Config`] and owns its lifecycle. One
//! cancel token is shared by every component; [`LightOdrService::stop`] fires
//! it, drains the distributor and persists the reputation table.

use std::sync::Arc;

use lightwire_config::Config;
use lightwire_core::{CancelToken, PoolTransport, ReputationStore};
use lightwire_types::B256;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::distributor::{Distributor, DistributorStats};
use crate::odr::{HeaderSource, Odr};
use crate::peers::{PeerSet, PeerSetStats};
use crate::pool::{les_topic, PoolStats, ServerPool};
use crate::retrieve::RetrieveManager;
use crate::store::{FileReputationStore, MemoryReputationStore};
use crate::{OdrError, Result};

/// Combined statistics of the retrieval stack
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceStats {
    /// Connected servers
    pub peers: PeerSetStats,
    /// Known candidates
    pub pool: PoolStats,
    /// Outstanding requests
    pub distributor: DistributorStats,
}

/// The wired retrieval stack.
pub struct LightOdrService {
    config: Config,
    registry: Arc<PeerSet>,
    pool: Arc<ServerPool>,
    distributor: Arc<Distributor>,
    retrieve: Arc<RetrieveManager>,
    odr: Odr,
    store: Arc<dyn ReputationStore>,
    cancel: CancelToken,
    pool_task: Mutex<Option<JoinHandle<()>>>,
    dialer: Mutex<Option<(Arc<dyn PoolTransport>, String)>>,
}

impl LightOdrService {
    /// Build every component. Nothing runs until [`start`](Self::start).
    ///
    /// The reputation table is kept in `pool.reputation_path` when set, in
    /// memory otherwise.
    pub fn new(config: Config, headers: Arc<dyn HeaderSource>) -> Result<Self> {
        let store: Arc<dyn ReputationStore> = match &config.pool.reputation_path {
            Some(path) => Arc::new(FileReputationStore::new(path.clone())),
            None => Arc::new(MemoryReputationStore::new()),
        };
        Self::with_store(config, headers, store)
    }

    /// Build with an explicit reputation store.
    ///
    /// Fails with [`OdrError::Config`] if `config` does not validate.
    pub fn with_store(
        config: Config,
        headers: Arc<dyn HeaderSource>,
        store: Arc<dyn ReputationStore>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| OdrError::Config(e.to_string()))?;
        let cancel = CancelToken::new();
        let registry = Arc::new(PeerSet::new());
        let pool = Arc::new(ServerPool::new(registry.clone(), &config, cancel.clone())?);
        let distributor = Distributor::new(registry.clone());
        let retrieve = Arc::new(RetrieveManager::new(
            distributor.clone(),
            pool.clone(),
            config.request.max_retries,
            config.request.timeout(),
            cancel.clone(),
        ));
        let odr = Odr::new(retrieve.clone(), headers);

        Ok(Self {
            config,
            registry,
            pool,
            distributor,
            retrieve,
            odr,
            store,
            cancel,
            pool_task: Mutex::new(None),
            dialer: Mutex::new(None),
        })
    }

    /// Load reputations and start discovering and dialing servers for the
    /// chain with `genesis`.
    pub async fn start(&self, transport: Arc<dyn PoolTransport>, genesis: B256) -> Result<()> {
        let topic = les_topic(&genesis, self.config.peers.protocol_version)?;

        if let Err(e) = self.pool.load_reputation(self.store.as_ref()).await {
            warn!(error = %e, "Starting with an empty reputation table");
        }

        if self.config.peers.is_ultra_light() {
            info!(
                trusted = self.config.peers.trusted.len(),
                min_trusted_fraction = ?self.config.peers.min_trusted_fraction,
                "Running with trusted servers"
            );
        }

        *self.dialer.lock() = Some((transport.clone(), topic.clone()));
        let handle = self.pool.start(transport, topic.clone());
        if let Some(previous) = self.pool_task.lock().replace(handle) {
            previous.abort();
        }
        info!(%topic, light_peers = self.config.peers.light_peers, "Light ODR service started");
        Ok(())
    }

    /// Stop every component and persist reputations.
    ///
    /// Outstanding retrievals resolve with [`OdrError::Shutdown`](crate::OdrError::Shutdown).
    pub async fn stop(&self) -> Result<()> {
        self.cancel.cancel();
        self.distributor.shutdown();

        self.dialer.lock().take();
        let handle = self.pool_task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Server pool task ended abnormally");
            }
        }

        self.pool.save_reputation(self.store.as_ref()).await?;
        info!("Light ODR service stopped");
        Ok(())
    }

    /// Periodic maintenance: decay scores, evict over capacity and, once
    /// started, redial candidates whose backoff has elapsed.
    pub async fn tick(&self) {
        self.pool.tick();
        let dialer = self.dialer.lock().clone();
        if let Some((transport, topic)) = dialer {
            if !self.is_stopped() {
                self.pool.dial_round(&transport, &topic).await;
            }
        }
    }

    /// Whether [`stop`](Self::stop) has been called
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Chain-facing adapter
    pub fn odr(&self) -> &Odr {
        &self.odr
    }

    /// Retrieve manager for callers with their own validators
    pub fn retrieve(&self) -> &Arc<RetrieveManager> {
        &self.retrieve
    }

    /// Connected servers
    pub fn registry(&self) -> &Arc<PeerSet> {
        &self.registry
    }

    /// Candidate pool
    pub fn pool(&self) -> &Arc<ServerPool> {
        &self.pool
    }

    /// Request distributor
    pub fn distributor(&self) -> &Arc<Distributor> {
        &self.distributor
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Service statistics
    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            peers: self.registry.stats(),
            pool: self.pool.stats(),
            distributor: self.distributor.stats(),
        }
    }
}
