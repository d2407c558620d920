//! Stake ledger view: membership, weights, and the periodic sync task.
//!
//! The dispatcher never talks to the ledger directly. It reads an
//! immutable [`StakeSnapshot`] through a [`StakeView`]; a background task
//! replaces the snapshot wholesale on every refresh and prunes the
//! registry to the new membership. Reads may be stale by up to one
//! refresh interval, which is accepted by design.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use pix_proto::ValidatorId;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::registry::ValidatorRegistry;

/// Errors from fetching stake membership.
#[derive(Debug, Error)]
pub enum OracleError {
    /// The ledger endpoint could not be reached or returned an error.
    #[error("oracle request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The ledger response did not match the expected shape.
    #[error("invalid oracle response: {0}")]
    InvalidResponse(String),
}

/// Immutable membership-and-weights view of the stake ledger.
///
/// Replaced wholesale on each refresh, never partially mutated. The
/// membership order is significant: a validator's ordinal position is the
/// `uid` it presents during the handshake.
#[derive(Debug, Default)]
pub struct StakeSnapshot {
    members: Vec<(ValidatorId, f64)>,
    weights: HashMap<ValidatorId, f64>,
}

impl StakeSnapshot {
    /// Build a snapshot from an ordered membership list.
    ///
    /// Negative weights are clamped to zero; the ledger should never
    /// produce them, but a bad value must not poison selection.
    #[must_use]
    pub fn new(members: Vec<(ValidatorId, f64)>) -> Self {
        let members: Vec<(ValidatorId, f64)> = members
            .into_iter()
            .map(|(id, stake)| {
                if stake < 0.0 {
                    warn!(validator = %id, stake, "negative stake clamped to zero");
                    (id, 0.0)
                } else {
                    (id, stake)
                }
            })
            .collect();
        let weights = members.iter().cloned().collect();
        Self { members, weights }
    }

    /// Stake weight of a member, `None` for non-members.
    #[must_use]
    pub fn weight_of(&self, id: &ValidatorId) -> Option<f64> {
        self.weights.get(id).copied()
    }

    /// Whether the id is part of the current membership.
    #[must_use]
    pub fn contains(&self, id: &ValidatorId) -> bool {
        self.weights.contains_key(id)
    }

    /// Resolve a membership ordinal to the validator at that position.
    #[must_use]
    pub fn resolve_uid(&self, uid: u64) -> Option<&ValidatorId> {
        self.members.get(usize::try_from(uid).ok()?).map(|(id, _)| id)
    }

    /// The membership as a set, for registry pruning.
    #[must_use]
    pub fn member_set(&self) -> HashSet<ValidatorId> {
        self.weights.keys().cloned().collect()
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the membership is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Cheaply cloneable handle to the current [`StakeSnapshot`].
///
/// `current()` hands out the `Arc` itself, so a dispatch keeps a
/// consistent view for its whole lifetime while `replace()` swaps the
/// snapshot for everyone who asks later.
#[derive(Debug, Clone, Default)]
pub struct StakeView {
    inner: Arc<RwLock<Arc<StakeSnapshot>>>,
}

impl StakeView {
    /// Create a view seeded with the given snapshot.
    #[must_use]
    pub fn new(snapshot: StakeSnapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(snapshot))),
        }
    }

    /// The current snapshot.
    #[must_use]
    pub fn current(&self) -> Arc<StakeSnapshot> {
        Arc::clone(&self.inner.read())
    }

    /// Atomically replace the snapshot.
    pub fn replace(&self, snapshot: StakeSnapshot) {
        *self.inner.write() = Arc::new(snapshot);
    }
}

/// Source of stake membership, typically the external ledger service.
pub trait StakeOracle: Send + Sync {
    /// Fetch the current ordered membership with stake weights.
    fn fetch_membership(
        &self,
    ) -> impl Future<Output = Result<Vec<(ValidatorId, f64)>, OracleError>> + Send;
}

/// One membership entry in the oracle's JSON response.
#[derive(Debug, Deserialize)]
struct MembershipEntry {
    id: ValidatorId,
    stake: f64,
}

/// HTTP stake oracle: GETs a JSON membership document.
///
/// Expected body: `[{"id": "...", "stake": 12.5}, ...]` in membership
/// order.
#[derive(Debug, Clone)]
pub struct HttpStakeOracle {
    url: String,
    client: reqwest::Client,
}

impl HttpStakeOracle {
    /// Create an oracle for the given membership URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

impl StakeOracle for HttpStakeOracle {
    async fn fetch_membership(&self) -> Result<Vec<(ValidatorId, f64)>, OracleError> {
        let entries: Vec<MembershipEntry> = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .map_err(|e| OracleError::InvalidResponse(e.to_string()))?;
        Ok(entries.into_iter().map(|e| (e.id, e.stake)).collect())
    }
}

/// Background stake sync loop.
///
/// Each tick fetches membership, replaces the snapshot atomically, then
/// prunes the registry. A failed fetch keeps the previous snapshot. The
/// first tick fires immediately so the gateway starts with a real
/// membership instead of an empty one.
pub async fn run_stake_sync<O: StakeOracle>(
    oracle: O,
    view: StakeView,
    registry: Arc<ValidatorRegistry>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match oracle.fetch_membership().await {
                    Ok(members) => {
                        let snapshot = StakeSnapshot::new(members);
                        info!(members = snapshot.len(), "stake membership refreshed");
                        let member_set = snapshot.member_set();
                        view.replace(snapshot);
                        registry.prune(&member_set);
                    }
                    Err(e) => {
                        warn!(error = %e, "stake refresh failed, keeping previous snapshot");
                    }
                }
            }
            _ = shutdown.changed() => {
                debug!("stake sync stopping");
                break;
            }
        }
    }
}
