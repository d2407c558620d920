//! Validator registry: the authoritative map of known validators.
//!
//! The registry is shared between the handshake handler, the dispatcher,
//! and the health monitor. All methods take `&self`; an internal
//! [`parking_lot::RwLock`] makes every mutation atomic, and readers get
//! immutable clones that a concurrent write can never invalidate.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use pix_persist::JsonStore;
use pix_proto::ValidatorId;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Success/failure tallies for one calendar day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCounter {
    /// Requests this validator answered successfully.
    pub success: u64,
    /// Requests this validator failed (transport error or bad status).
    pub failure: u64,
}

/// A validator known to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorRecord {
    /// The validator's stable identity in the stake ledger.
    pub id: ValidatorId,
    /// Callback endpoint URL built at handshake time.
    pub endpoint: String,
    /// Whether the validator is currently dispatchable.
    pub active: bool,
    /// Per-day outcome counters, keyed by calendar date.
    #[serde(default)]
    pub counters: BTreeMap<NaiveDate, DailyCounter>,
    /// When the validator first handshook.
    pub registered_at: DateTime<Utc>,
    /// Last handshake or outcome touch.
    pub last_seen: DateTime<Utc>,
}

impl ValidatorRecord {
    fn new(id: ValidatorId, endpoint: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            endpoint,
            active: true,
            counters: BTreeMap::new(),
            registered_at: now,
            last_seen: now,
        }
    }

    /// Counter bucket for the given date, zeroes if none was recorded.
    #[must_use]
    pub fn counter_for(&self, date: NaiveDate) -> DailyCounter {
        self.counters.get(&date).copied().unwrap_or_default()
    }
}

/// Registry of known validators with optional JSON snapshot persistence.
#[derive(Debug)]
pub struct ValidatorRegistry {
    records: RwLock<HashMap<ValidatorId, ValidatorRecord>>,
    store: Option<JsonStore>,
}

impl ValidatorRegistry {
    /// Create an empty in-memory registry (tests, embedding).
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            store: None,
        }
    }

    /// Create a registry backed by `<state_dir>/validators.json`, loading
    /// any persisted records.
    ///
    /// Loaded records come back inactive: a validator must re-handshake or
    /// pass a health probe before it is dispatchable again.
    #[must_use]
    pub fn with_store(state_dir: &Path) -> Self {
        let store = JsonStore::new(state_dir, "validators");
        let mut records: HashMap<ValidatorId, ValidatorRecord> = store.load();
        for record in records.values_mut() {
            record.active = false;
        }
        debug!(count = records.len(), "loaded validator records from disk");
        Self {
            records: RwLock::new(records),
            store: Some(store),
        }
    }

    /// Register a validator, or refresh its endpoint if already known.
    ///
    /// Always leaves the record active; a handshake is proof of life.
    pub fn register(&self, id: ValidatorId, endpoint: String) {
        {
            let mut records = self.records.write();
            match records.get_mut(&id) {
                Some(record) => {
                    record.endpoint = endpoint;
                    record.active = true;
                    record.last_seen = Utc::now();
                }
                None => {
                    info!(validator = %id, endpoint = %endpoint, "new validator registered");
                    records.insert(id.clone(), ValidatorRecord::new(id, endpoint));
                }
            }
        }
        self.snapshot();
    }

    /// Set a validator's activity state. Unknown ids are ignored.
    pub fn mark_active(&self, id: &ValidatorId, active: bool) {
        let changed = {
            let mut records = self.records.write();
            match records.get_mut(id) {
                Some(record) => {
                    let changed = record.active != active;
                    record.active = active;
                    changed
                }
                None => false,
            }
        };
        if changed {
            self.snapshot();
        }
    }

    /// Delete every record whose id is not in the current membership.
    pub fn prune(&self, current_members: &HashSet<ValidatorId>) {
        let removed: Vec<ValidatorId> = {
            let mut records = self.records.write();
            let stale: Vec<ValidatorId> = records
                .keys()
                .filter(|id| !current_members.contains(*id))
                .cloned()
                .collect();
            for id in &stale {
                records.remove(id);
            }
            stale
        };
        for id in &removed {
            info!(validator = %id, "validator left the stake membership, removed");
        }
        if !removed.is_empty() {
            self.snapshot();
        }
    }

    /// Immutable copy of every active record, ordered by id.
    ///
    /// The clones are detached from the registry; concurrent writes cannot
    /// corrupt a snapshot a dispatch is already working through.
    #[must_use]
    pub fn snapshot_active(&self) -> Vec<ValidatorRecord> {
        let mut active: Vec<ValidatorRecord> = self
            .records
            .read()
            .values()
            .filter(|r| r.active)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        active
    }

    /// Record a dispatch outcome in the validator's daily counter bucket.
    ///
    /// The bucket is created on first use. Unknown ids are ignored (the
    /// validator may have been pruned mid-dispatch).
    pub fn record_outcome(&self, id: &ValidatorId, date: NaiveDate, success: bool) {
        {
            let mut records = self.records.write();
            let Some(record) = records.get_mut(id) else {
                debug!(validator = %id, "outcome for unknown validator dropped");
                return;
            };
            let counter = record.counters.entry(date).or_default();
            if success {
                counter.success += 1;
            } else {
                counter.failure += 1;
            }
            record.last_seen = Utc::now();
        }
        self.snapshot();
    }

    /// Look up a single record.
    #[must_use]
    pub fn get(&self, id: &ValidatorId) -> Option<ValidatorRecord> {
        self.records.read().get(id).cloned()
    }

    /// Every known `(id, endpoint)` pair, active or not.
    ///
    /// The health monitor probes all of them; an inactive validator earns
    /// its way back in by answering a probe.
    #[must_use]
    pub fn endpoints(&self) -> Vec<(ValidatorId, String)> {
        self.records
            .read()
            .iter()
            .map(|(id, record)| (id.clone(), record.endpoint.clone()))
            .collect()
    }

    /// Number of known validators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the registry has no validators at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn snapshot(&self) {
        let Some(store) = &self.store else { return };
        let records = self.records.read().clone();
        if let Err(e) = store.save(&records) {
            warn!(error = %e, "failed to snapshot validator registry");
        }
    }
}

impl Default for ValidatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
