//! Reputation scores.
//!
//! Scores live in a bounded range. A valid answer moves a score up, a missed
//! deadline moves it down, and a rejected answer moves it down further.
//! Decay toward neutral happens only when the owner calls
//! [`ScoreTable::tick`].

use std::collections::HashMap;

use lightwire_config::ReputationConfig;
use lightwire_core::{PeerId, ReputationTable};

/// Score bounds and step sizes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReputationParams {
    /// Floor
    pub min: f64,
    /// Ceiling
    pub max: f64,
    /// Neutral score for peers with no history
    pub initial: f64,
    /// Added on [`Outcome::Success`]
    pub success_reward: f64,
    /// Subtracted on [`Outcome::Timeout`]
    pub timeout_penalty: f64,
    /// Subtracted on [`Outcome::InvalidAnswer`]
    pub invalid_penalty: f64,
    /// Distance moved toward neutral per tick
    pub decay_per_tick: f64,
}

impl From<&ReputationConfig> for ReputationParams {
    fn from(config: &ReputationConfig) -> Self {
        Self {
            min: config.min,
            max: config.max,
            initial: config.initial,
            success_reward: config.success_reward,
            timeout_penalty: config.timeout_penalty,
            invalid_penalty: config.invalid_penalty,
            decay_per_tick: config.decay_per_tick,
        }
    }
}

impl Default for ReputationParams {
    fn default() -> Self {
        Self::from(&ReputationConfig::default())
    }
}

/// Result of one interaction with a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// The peer's answer passed validation
    Success,
    /// The peer did not answer before the deadline, or the exchange failed
    Timeout,
    /// The peer's answer failed validation
    InvalidAnswer,
    /// The peer could not be dialed. Counts toward candidate eviction only.
    DialFailure,
    /// The request was withdrawn before the peer answered. Neutral.
    Abandoned,
}

/// Bounded score per peer.
#[derive(Debug, Clone)]
pub struct ScoreTable {
    params: ReputationParams,
    scores: HashMap<PeerId, f64>,
}

impl ScoreTable {
    /// Empty table: every peer is neutral.
    pub fn new(params: ReputationParams) -> Self {
        Self {
            params,
            scores: HashMap::new(),
        }
    }

    /// Seed from a persisted table. Values are clamped into bounds and
    /// non-finite values are dropped.
    pub fn with_scores(params: ReputationParams, table: ReputationTable) -> Self {
        let mut scores = Self::new(params);
        scores.merge(table);
        scores
    }

    /// Add persisted entries, replacing existing ones.
    pub fn merge(&mut self, table: ReputationTable) {
        for (id, score) in table {
            if score.is_finite() {
                self.scores.insert(id, self.clamp(score));
            }
        }
    }

    /// Score parameters
    pub fn params(&self) -> &ReputationParams {
        &self.params
    }

    /// Current score, neutral if unknown
    pub fn score(&self, id: &PeerId) -> f64 {
        self.scores.get(id).copied().unwrap_or(self.params.initial)
    }

    /// Apply an outcome and return the new score.
    pub fn apply(&mut self, id: &PeerId, outcome: Outcome) -> f64 {
        let current = self.score(id);
        let next = match outcome {
            Outcome::Success => current + self.params.success_reward,
            Outcome::Timeout => current - self.params.timeout_penalty,
            Outcome::InvalidAnswer => current - self.params.invalid_penalty,
            Outcome::DialFailure | Outcome::Abandoned => return current,
        };
        let next = self.clamp(next);
        self.scores.insert(id.clone(), next);
        next
    }

    /// Move every score toward neutral by one decay step. Scores that reach
    /// neutral are dropped from the table.
    pub fn tick(&mut self) {
        let ReputationParams {
            initial,
            decay_per_tick: step,
            ..
        } = self.params;

        self.scores.retain(|_, score| {
            if *score > initial {
                *score = (*score - step).max(initial);
            } else if *score < initial {
                *score = (*score + step).min(initial);
            }
            *score != initial
        });
    }

    /// Forget a peer
    pub fn remove(&mut self, id: &PeerId) {
        self.scores.remove(id);
    }

    /// Peers with a non-neutral score
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// Whether every peer is neutral
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Copy for persistence
    pub fn snapshot(&self) -> ReputationTable {
        self.scores.clone()
    }

    fn clamp(&self, score: f64) -> f64 {
        score.clamp(self.params.min, self.params.max)
    }
}
