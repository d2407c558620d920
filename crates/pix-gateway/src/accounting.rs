//! Usage accounting: api-key admission and per-attempt bookkeeping.
//!
//! Accounting is strictly best-effort. The dispatcher invokes it on every
//! attempt, success or failure, and logs (never propagates) any error —
//! a broken ledger must not take down request serving.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use pix_persist::{JsonStore, PersistError};
use pix_proto::ValidatorId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from usage accounting.
#[derive(Debug, Error)]
pub enum AccountingError {
    /// Writing the ledger snapshot failed.
    #[error("ledger persistence failed: {0}")]
    Persist(#[from] PersistError),
}

/// One dispatch attempt, as seen by the accountant.
#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    /// The validator that was tried.
    pub validator: ValidatorId,
    /// Whether the attempt produced a usable response.
    pub success: bool,
    /// Wall-clock duration of the attempt.
    pub latency: Duration,
}

/// Sink for per-attempt usage records.
pub trait UsageAccountant: Send + Sync {
    /// Record one dispatch attempt for the given client key.
    ///
    /// # Errors
    ///
    /// Returns an error when the record could not be persisted; callers
    /// treat this as log-only.
    fn record_attempt(&self, client_key: &str, outcome: &AttemptOutcome)
    -> Result<(), AccountingError>;
}

impl<T: UsageAccountant> UsageAccountant for Arc<T> {
    fn record_attempt(
        &self,
        client_key: &str,
        outcome: &AttemptOutcome,
    ) -> Result<(), AccountingError> {
        T::record_attempt(self, client_key, outcome)
    }
}

/// Usage tally for one api key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Dispatch attempts made on behalf of this key, failures included.
    pub request_count: u64,
    /// Attempts that returned a usable response.
    pub success_count: u64,
    /// Remaining credit. Decremented once per successful generation.
    pub credits: i64,
}

/// Api-key ledger: admission check plus usage accounting.
///
/// The in-memory map always updates; the JSON snapshot is written after,
/// and a snapshot failure is reported without rolling anything back.
#[derive(Debug)]
pub struct ApiKeyLedger {
    records: RwLock<HashMap<String, UsageRecord>>,
    store: Option<JsonStore>,
}

impl ApiKeyLedger {
    /// Create an empty in-memory ledger (tests, embedding).
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            store: None,
        }
    }

    /// Create a ledger backed by `<state_dir>/auth_keys.json`.
    #[must_use]
    pub fn with_store(state_dir: &Path) -> Self {
        let store = JsonStore::new(state_dir, "auth_keys");
        let records: HashMap<String, UsageRecord> = store.load();
        debug!(keys = records.len(), "loaded api keys from disk");
        Self {
            records: RwLock::new(records),
            store: Some(store),
        }
    }

    /// Whether the key is admitted to `/generate`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.records.read().contains_key(key)
    }

    /// Create or top up a key with the given credit.
    pub fn grant(&self, key: impl Into<String>, credits: i64) {
        {
            let mut records = self.records.write();
            records.entry(key.into()).or_default().credits += credits;
        }
        if let Err(e) = self.snapshot() {
            warn!(error = %e, "failed to snapshot api key ledger");
        }
    }

    /// Current usage for a key.
    #[must_use]
    pub fn usage(&self, key: &str) -> Option<UsageRecord> {
        self.records.read().get(key).cloned()
    }

    fn snapshot(&self) -> Result<(), AccountingError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let records = self.records.read().clone();
        store.save(&records)?;
        Ok(())
    }
}

impl Default for ApiKeyLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageAccountant for ApiKeyLedger {
    fn record_attempt(
        &self,
        client_key: &str,
        outcome: &AttemptOutcome,
    ) -> Result<(), AccountingError> {
        {
            let mut records = self.records.write();
            let record = records.entry(client_key.to_string()).or_default();
            record.request_count += 1;
            if outcome.success {
                record.success_count += 1;
                record.credits -= 1;
            }
        }
        debug!(
            key = client_key,
            validator = %outcome.validator,
            success = outcome.success,
            latency_ms = outcome.latency.as_millis() as u64,
            "attempt recorded"
        );
        self.snapshot()
    }
}
