//! Stake-weighted dispatch with sequential failover.
//!
//! A dispatch builds its candidate set once — active registry records
//! intersected with the current stake membership — then draws candidates
//! by weighted random sampling without replacement until one succeeds or
//! the pool is exhausted. Attempts are strictly sequential; a request
//! never fans out to two validators at once, which bounds the load any
//! one request can put on a single node.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use pix_proto::{ForwardRequest, ValidatorId};
use rand::Rng;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::accounting::{AttemptOutcome, UsageAccountant};
use crate::client::ValidatorClient;
use crate::registry::ValidatorRegistry;
use crate::stake::StakeView;

/// Terminal dispatch failures.
///
/// The two variants are deliberately distinct so callers can tell
/// "nobody is available" from "everybody is currently broken".
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The candidate set was empty; no network call was made.
    #[error("no validators available")]
    NoValidatorsAvailable,

    /// Every candidate was tried and none produced a usable response.
    #[error("all {attempted} validators failed")]
    AllValidatorsFailed {
        /// Number of candidates attempted.
        attempted: usize,
    },
}

/// Dispatch policy knobs.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Constant added to every candidate's stake when weighting.
    ///
    /// The default of 1.0 keeps zero-stake validators selectable (matching
    /// the subnet's historical behavior); 0.0 makes selection proportional
    /// to raw stake.
    pub stake_epsilon: f64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { stake_epsilon: 1.0 }
    }
}

impl DispatchConfig {
    /// Set the stake epsilon.
    #[must_use]
    pub const fn with_stake_epsilon(mut self, epsilon: f64) -> Self {
        self.stake_epsilon = epsilon;
        self
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    id: ValidatorId,
    endpoint: String,
    weight: f64,
}

/// Forwards client requests to stake-weighted validators with failover.
#[derive(Debug)]
pub struct Dispatcher<C, A> {
    registry: Arc<ValidatorRegistry>,
    stake: StakeView,
    client: C,
    accountant: A,
    authorization: String,
    config: DispatchConfig,
}

impl<C: ValidatorClient, A: UsageAccountant> Dispatcher<C, A> {
    /// Create a dispatcher.
    ///
    /// `authorization` is the gateway's base64 public key, attached to
    /// every forwarded request so validators can verify the sender.
    #[must_use]
    pub fn new(
        registry: Arc<ValidatorRegistry>,
        stake: StakeView,
        client: C,
        accountant: A,
        authorization: String,
        config: DispatchConfig,
    ) -> Self {
        Self {
            registry,
            stake,
            client,
            accountant,
            authorization,
            config,
        }
    }

    /// Forward `payload` to the first validator that answers.
    ///
    /// Each candidate is attempted at most once; a drawn candidate is
    /// removed from the pool whether or not its attempt succeeds. Every
    /// attempt updates the validator's daily counter and the usage
    /// ledger (best-effort).
    ///
    /// # Errors
    ///
    /// [`DispatchError::NoValidatorsAvailable`] when the candidate set is
    /// empty, [`DispatchError::AllValidatorsFailed`] when every candidate
    /// was tried without success.
    pub async fn dispatch(
        &self,
        client_key: &str,
        payload: Value,
        model_name: &str,
    ) -> Result<Value, DispatchError> {
        let snapshot = self.stake.current();
        let mut candidates: Vec<Candidate> = self
            .registry
            .snapshot_active()
            .into_iter()
            .filter_map(|record| {
                snapshot.weight_of(&record.id).map(|stake| Candidate {
                    id: record.id,
                    endpoint: record.endpoint,
                    weight: stake + self.config.stake_epsilon,
                })
            })
            .collect();

        if candidates.is_empty() {
            debug!(model = model_name, "dispatch with empty candidate set");
            return Err(DispatchError::NoValidatorsAvailable);
        }

        let request = ForwardRequest {
            payload,
            authorization: self.authorization.clone(),
        };

        let mut attempted = 0usize;
        while let Some(candidate) = draw_weighted(&mut candidates) {
            attempted += 1;
            debug!(validator = %candidate.id, weight = candidate.weight, "validator selected");

            let started = Instant::now();
            let result = self.client.forward(&candidate.endpoint, &request).await;
            let latency = started.elapsed();
            let today = Utc::now().date_naive();

            match result {
                Ok(body) => {
                    self.registry.record_outcome(&candidate.id, today, true);
                    self.account(client_key, &candidate.id, true, latency);
                    info!(
                        validator = %candidate.id,
                        model = model_name,
                        attempt = attempted,
                        latency_ms = latency.as_millis() as u64,
                        "dispatch succeeded"
                    );
                    return Ok(body);
                }
                Err(e) => {
                    self.registry.record_outcome(&candidate.id, today, false);
                    self.account(client_key, &candidate.id, false, latency);
                    warn!(
                        validator = %candidate.id,
                        model = model_name,
                        error = %e,
                        "validator attempt failed, trying next candidate"
                    );
                }
            }
        }

        Err(DispatchError::AllValidatorsFailed { attempted })
    }

    fn account(
        &self,
        client_key: &str,
        validator: &ValidatorId,
        success: bool,
        latency: std::time::Duration,
    ) {
        let outcome = AttemptOutcome {
            validator: validator.clone(),
            success,
            latency,
        };
        if let Err(e) = self.accountant.record_attempt(client_key, &outcome) {
            warn!(error = %e, "usage accounting failed, continuing");
        }
    }
}

/// Remove and return one candidate, chosen with probability proportional
/// to its weight among those remaining.
///
/// Cumulative-weight search over the per-request vector; no shared state
/// is touched. Falls back to a uniform draw when the total weight is zero
/// (possible with epsilon 0 and an all-zero-stake pool).
fn draw_weighted(candidates: &mut Vec<Candidate>) -> Option<Candidate> {
    if candidates.is_empty() {
        return None;
    }

    let total: f64 = candidates.iter().map(|c| c.weight).sum();
    let mut rng = rand::thread_rng();

    let index = if total <= 0.0 {
        rng.gen_range(0..candidates.len())
    } else {
        let mut point = rng.gen_range(0.0..total);
        let mut chosen = candidates.len() - 1;
        for (i, candidate) in candidates.iter().enumerate() {
            if point < candidate.weight {
                chosen = i;
                break;
            }
            point -= candidate.weight;
        }
        chosen
    };

    Some(candidates.swap_remove(index))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, weight: f64) -> Candidate {
        Candidate {
            id: ValidatorId::from(id),
            endpoint: format!("http://{id}"),
            weight,
        }
    }

    #[test]
    fn draw_removes_the_chosen_candidate() {
        let mut pool = vec![candidate("a", 1.0), candidate("b", 1.0)];
        let first = draw_weighted(&mut pool).expect("draw");
        assert_eq!(pool.len(), 1);
        assert_ne!(pool[0].id, first.id);
    }

    #[test]
    fn draws_exhaust_the_pool_without_repeats() {
        let mut pool = vec![
            candidate("a", 3.0),
            candidate("b", 1.0),
            candidate("c", 0.5),
        ];
        let mut seen = Vec::new();
        while let Some(c) = draw_weighted(&mut pool) {
            seen.push(c.id);
        }
        seen.sort();
        assert_eq!(
            seen,
            vec![
                ValidatorId::from("a"),
                ValidatorId::from("b"),
                ValidatorId::from("c")
            ]
        );
        assert!(draw_weighted(&mut pool).is_none());
    }

    #[test]
    fn zero_total_weight_still_draws() {
        let mut pool = vec![candidate("a", 0.0), candidate("b", 0.0)];
        assert!(draw_weighted(&mut pool).is_some());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn first_draw_follows_stake_weights() {
        // Weights 10:1 - the heavy candidate should win the first draw
        // about 10/11 of the time. 1000 trials, generous bounds.
        let mut heavy_first = 0;
        for _ in 0..1000 {
            let mut pool = vec![candidate("heavy", 10.0), candidate("light", 1.0)];
            let first = draw_weighted(&mut pool).expect("draw");
            if first.id.as_str() == "heavy" {
                heavy_first += 1;
            }
        }
        assert!(heavy_first > 800, "heavy first {heavy_first} too low");
        assert!(heavy_first < 990, "heavy first {heavy_first} too high");
    }
}
