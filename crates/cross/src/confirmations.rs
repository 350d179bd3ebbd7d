//! Confirmations registry reads.

use std::collections::HashSet;
use std::future::Future;
use std::hash::Hash;

use alloy_primitives::{Address, BlockNumber, B256, U256};
use async_trait::async_trait;
use lightwire_config::CrossConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{CallError, CrossError, Result};

/// Result of one contract call
pub type CallResult<T> = std::result::Result<T, CallError>;

/// A cross-chain event awaiting confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    /// Block of the source chain event
    pub block_num: U256,
    /// Log index of the event within its block
    pub log_index: U256,
    /// Hash identifying the event
    pub event_hash: B256,
}

/// Getters of the confirmations registry contract.
///
/// Every call is evaluated against the state at `block`, never the latest
/// state.
#[async_trait]
pub trait ConfirmationsContract: Send + Sync {
    /// `votersLength()`
    async fn voters_length(&self, block: BlockNumber) -> CallResult<U256>;

    /// `getVoter(i)`
    async fn get_voter(&self, block: BlockNumber, index: U256) -> CallResult<Address>;

    /// `signersLength()`
    async fn signers_length(&self, block: BlockNumber) -> CallResult<U256>;

    /// `getSigner(i)`
    async fn get_signer(&self, block: BlockNumber, index: U256) -> CallResult<Address>;

    /// `pendingListLength()`
    async fn pending_list_length(&self, block: BlockNumber) -> CallResult<U256>;

    /// `pendingList(i)`
    async fn pending_list(&self, block: BlockNumber, index: U256) -> CallResult<ConfirmationRequest>;
}

/// Paginated reader over a [`ConfirmationsContract`].
pub struct ConfirmationsReader<'a, C: ?Sized> {
    contract: &'a C,
    max_length: u64,
}

impl<'a, C: ConfirmationsContract + ?Sized> ConfirmationsReader<'a, C> {
    /// Reader with the default length limit
    pub fn new(contract: &'a C) -> Self {
        Self::with_config(contract, &CrossConfig::default())
    }

    /// Reader with the limit from `config`
    pub fn with_config(contract: &'a C, config: &CrossConfig) -> Self {
        Self {
            contract,
            max_length: config.max_pagination_length,
        }
    }

    /// Voter set at `block`
    pub async fn voters(&self, block: BlockNumber) -> Result<HashSet<Address>> {
        let contract = self.contract;
        let length = contract
            .voters_length(block)
            .await
            .map_err(|source| CrossError::Call {
                method: "votersLength",
                source,
            })?;
        let voters = paginate("getVoter", length, self.max_length, move |index| {
            contract.get_voter(block, index)
        })
        .await?;
        let voters: HashSet<Address> = voters.into_iter().collect();
        debug!(block, voters = voters.len(), "Read confirmation voters");
        Ok(voters)
    }

    /// Signer set at `block`
    pub async fn signers(&self, block: BlockNumber) -> Result<HashSet<Address>> {
        let contract = self.contract;
        let length = contract
            .signers_length(block)
            .await
            .map_err(|source| CrossError::Call {
                method: "signersLength",
                source,
            })?;
        let signers = paginate("getSigner", length, self.max_length, move |index| {
            contract.get_signer(block, index)
        })
        .await?;
        let signers: HashSet<Address> = signers.into_iter().collect();
        debug!(block, signers = signers.len(), "Read confirmation signers");
        Ok(signers)
    }

    /// Pending confirmation requests at `block`, in contract order
    pub async fn pending_requests(&self, block: BlockNumber) -> Result<Vec<ConfirmationRequest>> {
        let contract = self.contract;
        let length = contract
            .pending_list_length(block)
            .await
            .map_err(|source| CrossError::Call {
                method: "pendingListLength",
                source,
            })?;
        let requests = paginate("pendingList", length, self.max_length, move |index| {
            contract.pending_list(block, index)
        })
        .await?;
        debug!(block, pending = requests.len(), "Read pending confirmation requests");
        Ok(requests)
    }
}

/// Call `get` for every index in `0..length`, stopping at the first failure.
async fn paginate<T, F, Fut>(method: &'static str, length: U256, limit: u64, mut get: F) -> Result<Vec<T>>
where
    F: FnMut(U256) -> Fut,
    Fut: Future<Output = CallResult<T>>,
{
    let count = u64::try_from(length)
        .ok()
        .filter(|count| *count <= limit)
        .ok_or(CrossError::LengthTooLarge {
            method,
            length,
            limit,
        })?;

    let mut items = Vec::with_capacity(count as usize);
    for index in 0..count {
        trace!(method, index, "Registry call");
        let item = get(U256::from(index))
            .await
            .map_err(|source| CrossError::PaginationFailure {
                method,
                index,
                source,
            })?;
        items.push(item);
    }
    Ok(items)
}

/// Elements of `a` missing from `b`, in no particular order.
pub fn difference<T: Eq + Hash + Clone>(a: &HashSet<T>, b: &HashSet<T>) -> Vec<T> {
    a.difference(b).cloned().collect()
}
