//! Gateway server configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the gateway server and its background tasks.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address to bind the HTTP server to.
    pub bind_addr: SocketAddr,
    /// Directory for persisted state (key file, registry, ledger).
    pub state_dir: PathBuf,
    /// Membership URL of the stake oracle.
    pub oracle_url: String,
    /// Timeout for one oracle fetch.
    pub oracle_timeout: Duration,
    /// Interval between stake membership refreshes.
    pub sync_period: Duration,
    /// Interval between health sweeps.
    pub probe_period: Duration,
    /// Per-probe timeout.
    pub probe_timeout: Duration,
    /// Connect timeout for generation forwards.
    pub connect_timeout: Duration,
    /// Total timeout for one generation forward.
    pub request_timeout: Duration,
    /// Constant added to every stake weight during selection.
    pub stake_epsilon: f64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 10003)),
            state_dir: PathBuf::from("./state"),
            oracle_url: "http://127.0.0.1:9944/membership".to_string(),
            oracle_timeout: Duration::from_secs(30),
            sync_period: Duration::from_secs(300),
            probe_period: Duration::from_secs(300),
            probe_timeout: Duration::from_secs(8),
            connect_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(64),
            stake_epsilon: 1.0,
        }
    }
}

impl GatewayConfig {
    /// Create a configuration with the given bind address.
    #[must_use]
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Self::default()
        }
    }

    /// Set the state directory.
    #[must_use]
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    /// Set the stake oracle URL.
    #[must_use]
    pub fn with_oracle_url(mut self, url: impl Into<String>) -> Self {
        self.oracle_url = url.into();
        self
    }

    /// Set the stake refresh interval.
    #[must_use]
    pub const fn with_sync_period(mut self, period: Duration) -> Self {
        self.sync_period = period;
        self
    }

    /// Set the health sweep interval.
    #[must_use]
    pub const fn with_probe_period(mut self, period: Duration) -> Self {
        self.probe_period = period;
        self
    }

    /// Set the stake epsilon.
    #[must_use]
    pub const fn with_stake_epsilon(mut self, epsilon: f64) -> Self {
        self.stake_epsilon = epsilon;
        self
    }
}
