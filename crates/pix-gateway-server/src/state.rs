//! Shared application state.

use std::sync::Arc;
use std::time::Instant;

use pix_gateway::{
    ApiKeyLedger, CredentialIssuer, DispatchConfig, Dispatcher, HttpValidatorClient, StakeView,
    ValidatorRegistry,
};

use crate::config::GatewayConfig;
use crate::error::ServerError;

/// State shared by every request handler.
pub struct AppState {
    /// Known validators and their activity state.
    pub registry: Arc<ValidatorRegistry>,
    /// Current stake membership view.
    pub stake: StakeView,
    /// Gateway identity used in the registration handshake.
    pub issuer: Arc<CredentialIssuer>,
    /// Api key admission and usage ledger.
    pub ledger: Arc<ApiKeyLedger>,
    /// Stake-weighted dispatcher over the validator pool.
    pub dispatcher: Dispatcher<HttpValidatorClient, Arc<ApiKeyLedger>>,
    /// Server start time, reported by the health endpoint.
    pub started_at: Instant,
}

impl AppState {
    /// Build the full state graph from configuration.
    ///
    /// Loads or generates the signing key, reloads the validator registry
    /// and api key ledger from the state directory, and wires the
    /// dispatcher on top of them.
    ///
    /// # Errors
    ///
    /// Returns an error if the signing key cannot be loaded or the HTTP
    /// client cannot be built.
    pub fn from_config(config: &GatewayConfig) -> Result<Arc<Self>, ServerError> {
        std::fs::create_dir_all(&config.state_dir)
            .map_err(|e| ServerError::Init(format!("cannot create state dir: {e}")))?;

        let key_path = config.state_dir.join("gateway_key.bin");
        let issuer = Arc::new(
            CredentialIssuer::load_or_generate(&key_path).map_err(ServerError::Handshake)?,
        );

        let registry = Arc::new(ValidatorRegistry::with_store(&config.state_dir));
        let ledger = Arc::new(ApiKeyLedger::with_store(&config.state_dir));
        let stake = StakeView::default();

        let client = HttpValidatorClient::new(
            config.connect_timeout,
            config.request_timeout,
            config.probe_timeout,
        )
        .map_err(|e| ServerError::Init(e.to_string()))?;

        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            stake.clone(),
            client,
            Arc::clone(&ledger),
            issuer.public_key_b64().to_string(),
            DispatchConfig::default().with_stake_epsilon(config.stake_epsilon),
        );

        Ok(Arc::new(Self {
            registry,
            stake,
            issuer,
            ledger,
            dispatcher,
            started_at: Instant::now(),
        }))
    }
}
