//! # pix-proto
//!
//! Wire types for Pixnet validator-gateway communication.
//!
//! This crate defines the shared vocabulary of the gateway:
//!
//! - [`ValidatorId`] - stable identity of a validator node
//! - [`HandshakeRequest`] / [`HandshakeResponse`] - the registration exchange
//! - [`ForwardRequest`] - the envelope posted to validator callback endpoints
//! - [`GeneratePrompt`] - the client-facing generation request

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod messages;
pub mod types;

pub use messages::{ForwardRequest, GeneratePrompt, HandshakeRequest, HandshakeResponse};
pub use types::ValidatorId;
