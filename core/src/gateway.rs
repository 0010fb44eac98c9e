//! Gateway assembly
//!
//! Wires the discovery filter, candidate queue, connection orchestrator,
//! interface reconciler and relay together and runs them under a
//! [`Supervisor`]. Platform collaborators are injected so the same wiring
//! runs against real hardware or test fakes.

use crate::ble::{run_discovery, CandidateQueue, DiscoveryConfig, DiscoveryFilter, ScanDriver};
use crate::connect::{ConnectionOrchestrator, HostBridge, OrchestratorConfig};
use crate::network::{HostNetwork, InterfaceReconciler, ReconcilerConfig};
use crate::relay::{RelayServer, RelayServerConfig, RelayServerError};
use crate::supervisor::{Supervisor, SupervisorError, TaskPolicy};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

/// How often the discovery task sweeps the dedup table and logs its counters
const DISCOVERY_STATS_INTERVAL: Duration = Duration::from_secs(60);

/// Restart settings for the recoverable tasks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisionConfig {
    pub max_restarts: u32,
    pub restart_backoff_ms: u64,
    /// Time tasks get to stop after shutdown is signalled
    pub shutdown_grace_ms: u64,
}

impl Default for SupervisionConfig {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            restart_backoff_ms: 1000,
            shutdown_grace_ms: 5000,
        }
    }
}

impl SupervisionConfig {
    pub fn restart_policy(&self) -> TaskPolicy {
        TaskPolicy::Restart {
            max_restarts: self.max_restarts,
            backoff: Duration::from_millis(self.restart_backoff_ms),
        }
    }
}

/// Full gateway configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub discovery: DiscoveryConfig,
    pub orchestrator: OrchestratorConfig,
    pub reconciler: ReconcilerConfig,
    pub relay: RelayServerConfig,
    pub supervision: SupervisionConfig,
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("relay startup failed: {0}")]
    Relay(#[from] RelayServerError),
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

/// A configured gateway ready to run
pub struct Gateway {
    config: GatewayConfig,
    scanner: Box<dyn ScanDriver>,
    bridge: Arc<dyn HostBridge>,
    host: Arc<dyn HostNetwork>,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        scanner: Box<dyn ScanDriver>,
        bridge: Arc<dyn HostBridge>,
        host: Arc<dyn HostNetwork>,
    ) -> Self {
        Self {
            config,
            scanner,
            bridge,
            host,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Run until `shutdown` resolves or a task fails for good.
    ///
    /// The relay is bound before anything else starts so a busy port or an
    /// unresolvable destination fails fast.
    pub async fn run<S>(self, shutdown: S) -> Result<(), GatewayError>
    where
        S: Future<Output = ()>,
    {
        let config = self.config;

        let relay = if config.relay.enabled {
            Some(Arc::new(RelayServer::bind(config.relay.clone()).await?))
        } else {
            info!("UDP relay disabled");
            None
        };

        let queue = Arc::new(CandidateQueue::new(config.discovery.queue_capacity));
        let filter = Arc::new(DiscoveryFilter::new(&config.discovery, queue.clone()));
        let orchestrator = Arc::new(ConnectionOrchestrator::new(
            config.orchestrator.clone(),
            self.bridge,
        ));
        // Shared across restarts so tracked interfaces survive a reconciler restart
        let reconciler = Arc::new(Mutex::new(InterfaceReconciler::new(
            config.reconciler.clone(),
        )));
        let scanner = Arc::new(Mutex::new(self.scanner));
        let host = self.host;

        let mut supervisor = Supervisor::with_shutdown_grace(Duration::from_millis(
            config.supervision.shutdown_grace_ms,
        ));
        let restart = config.supervision.restart_policy();

        {
            let signal = supervisor.shutdown_signal();
            let filter = filter.clone();
            supervisor.spawn("discovery", TaskPolicy::Fatal, move || {
                discovery_task(scanner.clone(), filter.clone(), signal.clone())
            });
        }
        {
            let signal = supervisor.shutdown_signal();
            let queue = queue.clone();
            supervisor.spawn("orchestrator", restart, move || {
                let orchestrator = orchestrator.clone();
                let queue = queue.clone();
                let signal = signal.clone();
                async move {
                    orchestrator.run(queue, signal).await;
                    anyhow::Ok(())
                }
            });
        }
        {
            let signal = supervisor.shutdown_signal();
            supervisor.spawn("reconciler", restart, move || {
                let reconciler = reconciler.clone();
                let host = host.clone();
                let signal = signal.clone();
                async move {
                    let mut reconciler = reconciler.lock().await;
                    reconciler.run(host.as_ref(), signal).await?;
                    anyhow::Ok(())
                }
            });
        }
        if let Some(relay) = relay.clone() {
            let signal = supervisor.shutdown_signal();
            supervisor.spawn("relay", TaskPolicy::Fatal, move || {
                let relay = relay.clone();
                let signal = signal.clone();
                async move {
                    relay.run(signal).await?;
                    anyhow::Ok(())
                }
            });
        }

        let result = supervisor.run(shutdown).await;
        queue.close();

        let stats = filter.stats();
        info!(
            observed = stats.observed,
            candidates = stats.candidates,
            duplicates = stats.duplicates,
            dropped = stats.dropped,
            "Gateway stopped"
        );
        if let Some(relay) = relay {
            let stats = relay.stats();
            info!(
                upstream = stats.datagrams_upstream,
                downstream = stats.datagrams_downstream,
                sessions = stats.sessions_opened,
                "Relay totals"
            );
        }

        result.map_err(GatewayError::from)
    }
}

async fn discovery_task(
    scanner: Arc<Mutex<Box<dyn ScanDriver>>>,
    filter: Arc<DiscoveryFilter>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut driver = scanner.lock().await;
    let discovery = run_discovery(&mut **driver, filter.clone());
    tokio::pin!(discovery);

    let mut ticker = tokio::time::interval_at(
        Instant::now() + DISCOVERY_STATS_INTERVAL,
        DISCOVERY_STATS_INTERVAL,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            result = &mut discovery => {
                result?;
                return Ok(());
            }
            _ = ticker.tick() => {
                let evicted = filter.sweep(Instant::now());
                let stats = filter.stats();
                debug!(
                    observed = stats.observed,
                    not_ipsp = stats.not_ipsp,
                    duplicates = stats.duplicates,
                    candidates = stats.candidates,
                    dropped = stats.dropped,
                    tracked = filter.tracked_devices(),
                    evicted,
                    "Discovery stats"
                );
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return Ok(());
                }
            }
        }
    }
}
