//! Outbound HTTP to validator callback endpoints.
//!
//! [`ValidatorClient`] is the seam between the dispatcher/health monitor
//! and the network: production uses [`HttpValidatorClient`], tests supply
//! scripted implementations.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use pix_proto::ForwardRequest;
use serde_json::Value;
use thiserror::Error;

/// Per-attempt failures talking to a single validator.
///
/// These are never fatal on their own; the dispatcher downgrades them to
/// one validator failure and moves to the next candidate.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Timeout, connection refused, DNS failure, or client construction.
    #[error("transport error: {0}")]
    Transport(String),

    /// The validator answered with a non-success status.
    #[error("validator returned status {0}")]
    Status(u16),

    /// The validator answered 2xx but the body was not parseable JSON.
    #[error("unparseable response body: {0}")]
    InvalidBody(String),
}

/// Transport to validator endpoints.
pub trait ValidatorClient: Send + Sync {
    /// POST a generation forward and return the parsed JSON body.
    fn forward(
        &self,
        endpoint: &str,
        request: &ForwardRequest,
    ) -> impl Future<Output = Result<Value, ClientError>> + Send;

    /// POST a health probe. `Ok` means the validator counts as alive.
    fn probe(
        &self,
        endpoint: &str,
        request: &ForwardRequest,
    ) -> impl Future<Output = Result<(), ClientError>> + Send;
}

impl<T: ValidatorClient> ValidatorClient for Arc<T> {
    fn forward(
        &self,
        endpoint: &str,
        request: &ForwardRequest,
    ) -> impl Future<Output = Result<Value, ClientError>> + Send {
        T::forward(self, endpoint, request)
    }

    fn probe(
        &self,
        endpoint: &str,
        request: &ForwardRequest,
    ) -> impl Future<Output = Result<(), ClientError>> + Send {
        T::probe(self, endpoint, request)
    }
}

/// `reqwest`-backed validator client.
///
/// Forwards use a short connect timeout and a long total timeout (image
/// generation is slow); probes use a single short timeout. Liveness
/// policy: a probe succeeds only on a 2xx response — a reachable but
/// erroring validator is treated as down.
#[derive(Debug, Clone)]
pub struct HttpValidatorClient {
    forward: reqwest::Client,
    probe: reqwest::Client,
}

impl HttpValidatorClient {
    /// Build a client with the given timeout profile.
    ///
    /// # Errors
    ///
    /// Returns an error if either underlying HTTP client cannot be built.
    pub fn new(
        connect_timeout: Duration,
        request_timeout: Duration,
        probe_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let forward = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let probe = reqwest::Client::builder()
            .timeout(probe_timeout)
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(Self { forward, probe })
    }
}

impl ValidatorClient for HttpValidatorClient {
    async fn forward(
        &self,
        endpoint: &str,
        request: &ForwardRequest,
    ) -> Result<Value, ClientError> {
        let response = self
            .forward
            .post(endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status(status.as_u16()));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::InvalidBody(e.to_string()))
    }

    async fn probe(&self, endpoint: &str, request: &ForwardRequest) -> Result<(), ClientError> {
        let response = self
            .probe
            .post(endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ClientError::Status(status.as_u16()))
        }
    }
}
