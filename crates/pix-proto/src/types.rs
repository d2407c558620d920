//! Core types for the Pixnet protocol.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of a validator node.
///
/// Validator ids originate in the external stake ledger (the ledger's
/// account key for the node) and are treated as opaque strings here.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidatorId(String);

impl ValidatorId {
    /// Create a validator id from its string form.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ValidatorId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ValidatorId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for ValidatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
