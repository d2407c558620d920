//! Background health monitoring of validator endpoints.
//!
//! Each sweep probes every known validator concurrently — active or
//! not, so a downed validator can earn its way back — and flips its
//! activity flag from the result. Sweeps run on their own task and never
//! block request serving; the per-probe timeout lives in the client, so
//! a sweep is bounded by the slowest probe.

use std::sync::Arc;
use std::time::Duration;

use pix_proto::ForwardRequest;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::client::ValidatorClient;
use crate::registry::ValidatorRegistry;

/// Periodic validator health prober.
#[derive(Debug)]
pub struct HealthMonitor<C> {
    registry: Arc<ValidatorRegistry>,
    client: C,
    period: Duration,
    authorization: String,
}

impl<C: ValidatorClient> HealthMonitor<C> {
    /// Create a monitor.
    ///
    /// `authorization` is the gateway's base64 public key, attached to
    /// every probe like any other forward.
    #[must_use]
    pub fn new(
        registry: Arc<ValidatorRegistry>,
        client: C,
        period: Duration,
        authorization: String,
    ) -> Self {
        Self {
            registry,
            client,
            period,
            authorization,
        }
    }

    /// Run sweeps on a fixed interval until the shutdown signal fires.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep().await,
                _ = shutdown.changed() => {
                    debug!("health monitor stopping");
                    break;
                }
            }
        }
    }

    /// Probe every known validator once and update activity flags.
    ///
    /// Public so tests (and operators' debug hooks) can run a sweep
    /// without the timer.
    pub async fn sweep(&self) {
        let targets = self.registry.endpoints();
        if targets.is_empty() {
            debug!("no validators to probe");
            return;
        }

        let request = ForwardRequest::probe(self.authorization.clone());
        let probes = targets.into_iter().map(|(id, endpoint)| {
            let request = request.clone();
            let client = &self.client;
            async move {
                let alive = client.probe(&endpoint, &request).await;
                (id, alive)
            }
        });

        let results = futures::future::join_all(probes).await;

        let mut alive_count = 0usize;
        for (id, result) in results {
            match result {
                Ok(()) => {
                    alive_count += 1;
                    self.registry.mark_active(&id, true);
                }
                Err(e) => {
                    warn!(validator = %id, error = %e, "health probe failed");
                    self.registry.mark_active(&id, false);
                }
            }
        }

        info!(
            alive = alive_count,
            total = self.registry.len(),
            "validator recheck complete"
        );
    }
}
