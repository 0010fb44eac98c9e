//! Connection orchestrator — drives the registration handshake per candidate
//!
//! Each candidate walks `Received → Delayed → Registering → (Succeeded | GaveUp)`.
//! Candidates are taken from the queue one at a time in enqueue order; with the
//! default single worker no two registrations ever overlap, and a slow candidate
//! holds up the ones behind it.

use super::bridge::{BridgeError, ConnectionType, HostBridge};
use crate::ble::{CandidateEvent, CandidateQueue};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Wait before the first attempt so the BLE stack can settle (ms)
    pub grace_period_ms: u64,
    /// Upper bound on registration attempts per candidate
    pub max_attempts: u32,
    /// Wait between attempts (ms)
    pub attempt_interval_ms: u64,
    /// Address type passed to the host bridge
    pub connection_type: ConnectionType,
    /// Number of workers draining the candidate queue
    pub workers: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 1000,
            max_attempts: 10,
            attempt_interval_ms: 1000,
            connection_type: ConnectionType::LeRandom,
            workers: 1,
        }
    }
}

impl OrchestratorConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn attempt_interval(&self) -> Duration {
        Duration::from_millis(self.attempt_interval_ms)
    }
}

/// Lifecycle of one candidate inside the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Dequeued
    Received,
    /// Waiting out the grace period
    Delayed,
    /// Issuing registration attempt `attempt` (1-based)
    Registering { attempt: u32 },
    /// Every attempt was accepted by the host bridge
    Succeeded,
    /// An attempt failed; no further attempts are issued
    GaveUp,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Succeeded | ConnectionState::GaveUp)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Received => write!(f, "received"),
            ConnectionState::Delayed => write!(f, "delayed"),
            ConnectionState::Registering { attempt } => write!(f, "registering (attempt {})", attempt),
            ConnectionState::Succeeded => write!(f, "succeeded"),
            ConnectionState::GaveUp => write!(f, "gave up"),
        }
    }
}

/// Terminal result of handling one candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOutcome {
    pub address: String,
    pub state: ConnectionState,
    /// Registration attempts issued
    pub attempts: u32,
    /// The failure that ended the retry loop, if any
    pub error: Option<BridgeError>,
}

/// Sequential consumer of candidate events
pub struct ConnectionOrchestrator {
    config: OrchestratorConfig,
    bridge: Arc<dyn HostBridge>,
}

impl ConnectionOrchestrator {
    pub fn new(config: OrchestratorConfig, bridge: Arc<dyn HostBridge>) -> Self {
        Self { config, bridge }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run one candidate through the state machine to a terminal state
    pub async fn handle_candidate(&self, candidate: CandidateEvent) -> ConnectionOutcome {
        let address = candidate.observation.address.clone();
        let max_attempts = self.config.max_attempts.max(1);
        let mut state = ConnectionState::Received;
        let mut attempts = 0;
        let mut error = None;

        while !state.is_terminal() {
            debug!(%address, %state, "Connection state");
            state = match state {
                ConnectionState::Received => {
                    info!(
                        %address,
                        name = candidate.observation.display_name(),
                        rssi = ?candidate.observation.rssi,
                        "Handling IPSP candidate"
                    );
                    ConnectionState::Delayed
                }
                ConnectionState::Delayed => {
                    tokio::time::sleep(self.config.grace_period()).await;
                    info!(%address, "Registering device on 6LoWPAN control");
                    ConnectionState::Registering { attempt: 1 }
                }
                ConnectionState::Registering { attempt } => {
                    attempts = attempt;
                    match self
                        .bridge
                        .register_connection(&address, self.config.connection_type)
                        .await
                    {
                        Err(e) => {
                            warn!(%address, attempt, "Failed to register 6LoWPAN device: {}", e);
                            error = Some(e);
                            ConnectionState::GaveUp
                        }
                        Ok(()) if attempt >= max_attempts => ConnectionState::Succeeded,
                        Ok(()) => {
                            tokio::time::sleep(self.config.attempt_interval()).await;
                            ConnectionState::Registering {
                                attempt: attempt + 1,
                            }
                        }
                    }
                }
                ConnectionState::Succeeded | ConnectionState::GaveUp => state,
            };
        }

        info!(%address, %state, attempts, "Connection handling finished");
        ConnectionOutcome {
            address,
            state,
            attempts,
            error,
        }
    }

    /// Drain `queue` until it closes or `shutdown` flips to `true`.
    ///
    /// Runs `config.workers` consumers (at least one) against the same queue.
    pub async fn run(&self, queue: Arc<CandidateQueue>, shutdown: watch::Receiver<bool>) {
        let workers = self.config.workers.max(1);
        debug!(workers, "Connection orchestrator started");
        let consumers = (0..workers).map(|worker| {
            let queue = queue.clone();
            let shutdown = shutdown.clone();
            self.worker(worker, queue, shutdown)
        });
        futures::future::join_all(consumers).await;
        debug!("Connection orchestrator stopped");
    }

    async fn worker(
        &self,
        worker: usize,
        queue: Arc<CandidateQueue>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            let candidate = tokio::select! {
                candidate = queue.pop() => candidate,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };
            let Some(candidate) = candidate else { break };

            debug!(worker, sequence = candidate.sequence, "Dequeued candidate");
            let outcome = tokio::select! {
                outcome = self.handle_candidate(candidate) => outcome,
                _ = shutdown.changed() => break,
            };
            if outcome.state == ConnectionState::GaveUp {
                debug!(address = %outcome.address, "Candidate abandoned");
            }
        }
    }
}
