//! # pix-gateway
//!
//! Core library for the Pixnet generation gateway.
//!
//! The gateway fronts a decentralized pool of validator nodes. This crate
//! provides the pieces the HTTP server wires together:
//!
//! - [`ValidatorRegistry`] - authoritative map of known validators, their
//!   activity state, and daily outcome counters
//! - [`StakeView`] / [`StakeOracle`] - periodically refreshed view of the
//!   stake ledger's membership and weights
//! - [`CredentialIssuer`] - Ed25519 identity proof for the registration
//!   handshake
//! - [`Dispatcher`] - stake-weighted random selection with sequential
//!   failover
//! - [`HealthMonitor`] - background probing of validator callback endpoints
//! - [`ApiKeyLedger`] - admission check and best-effort usage accounting

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod accounting;
pub mod client;
pub mod credentials;
pub mod dispatch;
pub mod health;
pub mod registry;
pub mod stake;

pub use accounting::{AccountingError, ApiKeyLedger, AttemptOutcome, UsageAccountant, UsageRecord};
pub use client::{ClientError, HttpValidatorClient, ValidatorClient};
pub use credentials::{CredentialError, CredentialIssuer, IDENTITY_MESSAGE};
pub use dispatch::{DispatchConfig, DispatchError, Dispatcher};
pub use health::HealthMonitor;
pub use registry::{DailyCounter, ValidatorRecord, ValidatorRegistry};
pub use stake::{HttpStakeOracle, OracleError, StakeOracle, StakeSnapshot, StakeView, run_stake_sync};
