//! ODR Adapter
//!
//! Turns chain queries into retrievals. Each query is bound to a validator
//! that checks the answer against a root from a locally verified header,
//! and to a constraint that the serving peer advertises the needed
//! capability and a head at least as high as the queried block.
//!
//! Chain code works in processing passes. [`Odr::begin_pass`] opens a pass
//! with its own cache so identical queries inside the pass hit the network
//! once, even when issued concurrently. The cache dies with the pass.

use std::collections::HashMap;
use std::sync::Arc;

use lightwire_core::{CancelToken, Capabilities};
use lightwire_types::{receipts_root, BlockNumber, LightHeader, Receipt, B256};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, trace};

use crate::distributor::RequestConstraint;
use crate::proofs::{state_leaf, MerkleProof, ProofStep};
use crate::retrieve::{Request, RetrieveManager, ValidationError};
use crate::{OdrError, Result};

/// Source of locally verified headers.
pub trait HeaderSource: Send + Sync {
    /// Header at `number` on the local canonical chain
    fn header_by_number(&self, number: BlockNumber) -> Option<LightHeader>;

    /// Header with `hash`
    fn header_by_hash(&self, hash: &B256) -> Option<LightHeader>;
}

/// A chain query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OdrQuery {
    /// Value under `key` in the state committed by block `block`
    StateProof {
        /// Block whose state root anchors the proof
        block: BlockNumber,
        /// Hashed state key
        key: B256,
    },
    /// All receipts of a block
    Receipts {
        /// Block hash
        block_hash: B256,
    },
    /// `count` consecutive headers starting at `start`
    HeaderRange {
        /// First header number
        start: BlockNumber,
        /// Number of headers
        count: u64,
    },
}

/// Server answer to [`OdrQuery::StateProof`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateProofAnswer {
    /// Key the proof is for
    pub key: B256,
    /// Value, `None` when absent
    pub value: Option<Vec<u8>>,
    /// Path from the leaf to the state root
    pub path: Vec<ProofStep>,
}

/// A validated answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OdrAnswer {
    /// Proven state value
    State(Option<Vec<u8>>),
    /// Receipts matching the block's receipts root
    Receipts(Vec<Receipt>),
    /// Linked headers ending at a locally known header
    Headers(Vec<LightHeader>),
}

/// Chain-facing retrieval adapter.
#[derive(Clone)]
pub struct Odr {
    retrieve: Arc<RetrieveManager>,
    headers: Arc<dyn HeaderSource>,
}

impl Odr {
    /// Adapter over a retrieve manager and a header source
    pub fn new(retrieve: Arc<RetrieveManager>, headers: Arc<dyn HeaderSource>) -> Self {
        Self { retrieve, headers }
    }

    /// Open a processing pass with an empty cache.
    pub fn begin_pass(&self) -> OdrPass {
        OdrPass {
            odr: self.clone(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Run one query without caching.
    pub async fn fetch(&self, query: &OdrQuery, cancel: &CancelToken) -> Result<OdrAnswer> {
        let payload = serde_json::to_vec(query).map_err(|e| OdrError::Codec(e.to_string()))?;
        trace!(?query, "ODR query");

        match query {
            OdrQuery::StateProof { block, key } => {
                let header = self
                    .headers
                    .header_by_number(*block)
                    .ok_or_else(|| OdrError::UnknownHeader(format!("number {block}")))?;
                let constraint = RequestConstraint::new(Capabilities::STATE).with_min_head(*block);
                let validator = state_validator(*key, header.state_root);
                let value = self
                    .retrieve
                    .retrieve_default(Request::new(payload, constraint), &validator, cancel)
                    .await?;
                Ok(OdrAnswer::State(value))
            }
            OdrQuery::Receipts { block_hash } => {
                let header = self
                    .headers
                    .header_by_hash(block_hash)
                    .ok_or_else(|| OdrError::UnknownHeader(block_hash.to_string()))?;
                let constraint =
                    RequestConstraint::new(Capabilities::RECEIPTS).with_min_head(header.number);
                let validator = receipts_validator(header.receipts_root);
                let receipts = self
                    .retrieve
                    .retrieve_default(Request::new(payload, constraint), &validator, cancel)
                    .await?;
                Ok(OdrAnswer::Receipts(receipts))
            }
            OdrQuery::HeaderRange { start, count } => {
                if *count == 0 {
                    return Ok(OdrAnswer::Headers(Vec::new()));
                }
                let last = start
                    .checked_add(count - 1)
                    .ok_or_else(|| OdrError::Codec("header range overflows".into()))?;
                let anchor = self
                    .headers
                    .header_by_number(last)
                    .ok_or_else(|| OdrError::UnknownHeader(format!("number {last}")))?;
                let constraint = RequestConstraint::new(Capabilities::HEADERS).with_min_head(last);
                let validator = header_range_validator(*start, *count, anchor);
                let headers = self
                    .retrieve
                    .retrieve_default(Request::new(payload, constraint), &validator, cancel)
                    .await?;
                Ok(OdrAnswer::Headers(headers))
            }
        }
    }
}

/// One processing pass. Identical queries share a single retrieval.
pub struct OdrPass {
    odr: Odr,
    cache: Mutex<HashMap<OdrQuery, Arc<OnceCell<OdrAnswer>>>>,
}

impl OdrPass {
    /// Run a query, reusing a result from earlier in this pass.
    ///
    /// Concurrent callers of the same query wait on one retrieval. Failures
    /// are not cached; the next caller retries.
    pub async fn fetch(&self, query: OdrQuery, cancel: &CancelToken) -> Result<OdrAnswer> {
        let cell = self.cache.lock().entry(query.clone()).or_default().clone();
        if cell.initialized() {
            trace!(?query, "ODR cache hit");
        }
        let answer = cell
            .get_or_try_init(|| self.odr.fetch(&query, cancel))
            .await?;
        Ok(answer.clone())
    }

    /// State value under `key` at `block`
    pub async fn state(&self, block: BlockNumber, key: B256, cancel: &CancelToken) -> Result<Option<Vec<u8>>> {
        match self.fetch(OdrQuery::StateProof { block, key }, cancel).await? {
            OdrAnswer::State(value) => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    /// Receipts of the block with `block_hash`
    pub async fn receipts(&self, block_hash: B256, cancel: &CancelToken) -> Result<Vec<Receipt>> {
        match self.fetch(OdrQuery::Receipts { block_hash }, cancel).await? {
            OdrAnswer::Receipts(receipts) => Ok(receipts),
            other => Err(unexpected(other)),
        }
    }

    /// `count` headers starting at `start`
    pub async fn headers(&self, start: BlockNumber, count: u64, cancel: &CancelToken) -> Result<Vec<LightHeader>> {
        match self.fetch(OdrQuery::HeaderRange { start, count }, cancel).await? {
            OdrAnswer::Headers(headers) => Ok(headers),
            other => Err(unexpected(other)),
        }
    }

    /// Number of distinct queries seen in this pass
    pub fn cached(&self) -> usize {
        self.cache.lock().len()
    }

    /// End the pass and drop its cache.
    pub fn complete(self) {
        debug!(queries = self.cached(), "ODR pass complete");
    }
}

fn unexpected(answer: OdrAnswer) -> OdrError {
    OdrError::Codec(format!("answer kind mismatch: {answer:?}"))
}

fn decode<T: serde::de::DeserializeOwned>(answer: &[u8]) -> std::result::Result<T, ValidationError> {
    serde_json::from_slice(answer).map_err(|e| ValidationError::new(format!("undecodable answer: {e}")))
}

fn state_validator(
    key: B256,
    state_root: B256,
) -> impl Fn(&[u8]) -> std::result::Result<Option<Vec<u8>>, ValidationError> + Send + Sync {
    move |raw| {
        let answer: StateProofAnswer = decode(raw)?;
        if answer.key != key {
            return Err(ValidationError::new(format!("proof for {} not {}", answer.key, key)));
        }
        let proof = MerkleProof::new(state_leaf(&key, answer.value.as_deref()), answer.path);
        if !proof.verify(&state_root) {
            return Err(ValidationError::new("state proof does not match state root"));
        }
        Ok(answer.value)
    }
}

fn receipts_validator(
    expected_root: B256,
) -> impl Fn(&[u8]) -> std::result::Result<Vec<Receipt>, ValidationError> + Send + Sync {
    move |raw| {
        let receipts: Vec<Receipt> = decode(raw)?;
        if receipts_root(&receipts) != expected_root {
            return Err(ValidationError::new("receipts do not match receipts root"));
        }
        Ok(receipts)
    }
}

fn header_range_validator(
    start: BlockNumber,
    count: u64,
    anchor: LightHeader,
) -> impl Fn(&[u8]) -> std::result::Result<Vec<LightHeader>, ValidationError> + Send + Sync {
    move |raw| {
        let headers: Vec<LightHeader> = decode(raw)?;
        if headers.len() as u64 != count {
            return Err(ValidationError::new(format!(
                "expected {count} headers, got {}",
                headers.len()
            )));
        }
        for (offset, header) in headers.iter().enumerate() {
            if header.number != start + offset as u64 {
                return Err(ValidationError::new(format!(
                    "header {} out of sequence",
                    header.number
                )));
            }
            if !header.verify_hash() {
                return Err(ValidationError::new(format!(
                    "header {} hash mismatch",
                    header.number
                )));
            }
        }
        for pair in headers.windows(2) {
            if pair[1].parent_hash != pair[0].hash {
                return Err(ValidationError::new(format!(
                    "header {} does not link to its parent",
                    pair[1].number
                )));
            }
        }
        match headers.last() {
            Some(last) if last.hash == anchor.hash => Ok(headers),
            _ => Err(ValidationError::new("header range does not end at the known header")),
        }
    }
}
