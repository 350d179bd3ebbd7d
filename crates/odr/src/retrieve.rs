//! Retrieve Manager
//!
//! [`RetrieveManager::retrieve`] is the public entry point of the retrieval
//! stack. It submits a request to the [`Distributor`], validates whatever
//! comes back and keeps going against other peers until an answer passes,
//! the deadline elapses, the caller cancels or no eligible peer is left.
//!
//! Every peer that was actually contacted receives exactly one outcome in the
//! [`ServerPool`]: `Success`, `InvalidAnswer`, `Timeout`, or the neutral
//! `Abandoned` when the request was withdrawn or the peer vanished before
//! answering.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use lightwire_core::{CancelToken, PeerId};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::distributor::{DistEvent, DistRequest, Distributor, RequestConstraint, RequestId};
use crate::pool::ServerPool;
use crate::reputation::Outcome;
use crate::{OdrError, Result};

/// Rejection of a raw answer by a validator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    /// Rejection with a message
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Checks a raw answer and extracts the typed value from it.
///
/// Must be a pure function of the answer bytes and whatever trusted context
/// it captured (typically a header root).
pub trait Validator<T>: Send + Sync {
    /// Extract the value, or reject the answer.
    fn validate(&self, answer: &[u8]) -> std::result::Result<T, ValidationError>;
}

impl<T, F> Validator<T> for F
where
    F: Fn(&[u8]) -> std::result::Result<T, ValidationError> + Send + Sync,
{
    fn validate(&self, answer: &[u8]) -> std::result::Result<T, ValidationError> {
        self(answer)
    }
}

/// A query to retrieve.
#[derive(Debug, Clone)]
pub struct Request {
    /// Encoded query sent to the peer
    pub payload: Bytes,
    /// Which peers may answer
    pub constraint: RequestConstraint,
}

impl Request {
    /// Request with a payload and constraint
    pub fn new(payload: impl Into<Bytes>, constraint: RequestConstraint) -> Self {
        Self {
            payload: payload.into(),
            constraint,
        }
    }
}

/// How one distributor submission ended.
enum Attempt {
    Answer(PeerId, lightwire_core::TransportResult<Bytes>),
    NoPeers,
}

/// Submits requests, validates answers and retries on other peers.
pub struct RetrieveManager {
    distributor: Arc<Distributor>,
    pool: Arc<ServerPool>,
    max_retries: Option<usize>,
    default_timeout: Duration,
    shutdown: CancelToken,
    next_logical: AtomicU64,
}

impl RetrieveManager {
    /// Create a retrieve manager.
    ///
    /// `max_retries` caps the number of peers asked per call. With `None` a
    /// call keeps going until every eligible peer, including ones that
    /// connect while it is outstanding, has been tried.
    pub fn new(
        distributor: Arc<Distributor>,
        pool: Arc<ServerPool>,
        max_retries: Option<usize>,
        default_timeout: Duration,
        shutdown: CancelToken,
    ) -> Self {
        Self {
            distributor,
            pool,
            max_retries,
            default_timeout,
            shutdown,
            next_logical: AtomicU64::new(1),
        }
    }

    /// Default per-request timeout
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Retrieve with the default timeout.
    pub async fn retrieve_default<T, V>(
        &self,
        request: Request,
        validator: &V,
        cancel: &CancelToken,
    ) -> Result<T>
    where
        V: Validator<T> + ?Sized,
    {
        let deadline = Instant::now() + self.default_timeout;
        self.retrieve(request, validator, deadline, cancel).await
    }

    /// Retrieve a validated value.
    ///
    /// Resolves with the first answer that passes `validator`. Rejected
    /// answers and failed exchanges are retried on peers not yet tried.
    ///
    /// # Errors
    ///
    /// - [`OdrError::Timeout`] when `deadline` passes first
    /// - [`OdrError::Canceled`] as soon as `cancel` fires
    /// - [`OdrError::NoEligiblePeer`] when every eligible peer has been tried
    ///   or the retry budget is spent
    /// - [`OdrError::Shutdown`] when the stack is stopped
    pub async fn retrieve<T, V>(
        &self,
        request: Request,
        validator: &V,
        deadline: Instant,
        cancel: &CancelToken,
    ) -> Result<T>
    where
        V: Validator<T> + ?Sized,
    {
        let logical_id = self.next_logical.fetch_add(1, Ordering::Relaxed);
        let mut constraint = request.constraint;
        if self.pool.requires_trusted() {
            constraint.trusted_only = true;
        }

        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        let mut tried: HashSet<PeerId> = HashSet::new();
        let mut attempts = 0usize;
        trace!(logical = logical_id, max_retries = ?self.max_retries, "Retrieval started");

        loop {
            if self.max_retries.is_some_and(|max| attempts >= max) {
                debug!(logical = logical_id, attempts, "Retry budget exhausted");
                return Err(OdrError::NoEligiblePeer);
            }

            let (id, mut events) = self.distributor.queue(DistRequest {
                logical_id,
                payload: request.payload.clone(),
                constraint: constraint.clone(),
                tried: tried.clone(),
            })?;
            let mut assigned: Option<PeerId> = None;

            let attempt = loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        self.withdraw(id, assigned.take(), Outcome::Abandoned);
                        debug!(logical = logical_id, "Retrieval canceled");
                        return Err(OdrError::Canceled);
                    }
                    _ = self.shutdown.cancelled() => {
                        self.withdraw(id, assigned.take(), Outcome::Abandoned);
                        return Err(OdrError::Shutdown);
                    }
                    event = events.recv() => match event {
                        Some(DistEvent::Assigned(peer)) => {
                            tried.insert(peer.clone());
                            attempts += 1;
                            assigned = Some(peer);
                        }
                        Some(DistEvent::PeerLost(peer)) => {
                            assigned = None;
                            self.pool.report_outcome(&peer, Outcome::Abandoned);
                        }
                        Some(DistEvent::Answer { peer, result }) => break Attempt::Answer(peer, result),
                        Some(DistEvent::NoPeers) => break Attempt::NoPeers,
                        None => {
                            self.withdraw(id, assigned.take(), Outcome::Abandoned);
                            return Err(OdrError::Shutdown);
                        }
                    },
                    _ = &mut sleep => {
                        self.withdraw(id, assigned.take(), Outcome::Timeout);
                        debug!(logical = logical_id, attempts, "Retrieval timed out");
                        return Err(OdrError::Timeout);
                    }
                }
            };

            let (peer, result) = match attempt {
                Attempt::NoPeers => {
                    debug!(logical = logical_id, tried = tried.len(), "No eligible peer left");
                    return Err(OdrError::NoEligiblePeer);
                }
                Attempt::Answer(peer, result) => (peer, result),
            };

            match result {
                Ok(answer) => match validator.validate(&answer) {
                    Ok(value) => {
                        self.pool.report_outcome(&peer, Outcome::Success);
                        trace!(logical = logical_id, %peer, attempts, "Retrieval succeeded");
                        return Ok(value);
                    }
                    Err(reason) => {
                        let err = OdrError::InvalidAnswer {
                            peer: peer.clone(),
                            reason: reason.to_string(),
                        };
                        warn!(logical = logical_id, error = %err, "Answer rejected, retrying");
                        self.pool.report_outcome(&peer, Outcome::InvalidAnswer);
                    }
                },
                Err(e) => {
                    debug!(logical = logical_id, %peer, error = %e, "Exchange failed, retrying");
                    self.pool.report_outcome(&peer, Outcome::Timeout);
                }
            }
        }
    }

    fn withdraw(&self, id: RequestId, assigned: Option<PeerId>, outcome: Outcome) {
        self.distributor.cancel(id);
        if let Some(peer) = assigned {
            self.pool.report_outcome(&peer, outcome);
        }
    }
}
