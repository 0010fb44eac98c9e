//! Relay server — listens for device datagrams and forwards them upstream

use super::session::{RelaySession, SessionContext};
use super::RelayServerConfig;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

/// Statistics about relay operations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayServerStats {
    /// Devices with an open upstream session
    pub sessions_active: usize,
    /// Sessions opened since start
    pub sessions_opened: u64,
    /// Datagrams forwarded device → remote
    pub datagrams_upstream: u64,
    /// Datagrams forwarded remote → device
    pub datagrams_downstream: u64,
    pub bytes_upstream: u64,
    pub bytes_downstream: u64,
}

/// Relay error types
#[derive(Debug, Error)]
pub enum RelayServerError {
    #[error("failed to bind relay on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to resolve relay destination {destination}: {reason}")]
    Resolve { destination: String, reason: String },
    #[error("relay socket error: {0}")]
    Io(#[from] io::Error),
}

/// UDP-to-UDP relay
pub struct RelayServer {
    config: RelayServerConfig,
    socket: Arc<UdpSocket>,
    destination: SocketAddr,
    stats: Arc<RwLock<RelayServerStats>>,
}

impl RelayServer {
    /// Bind the listen socket and resolve the destination.
    ///
    /// Both are startup checks: a failure here means the gateway cannot relay.
    pub async fn bind(config: RelayServerConfig) -> Result<Self, RelayServerError> {
        let socket = UdpSocket::bind(config.listen)
            .await
            .map_err(|source| RelayServerError::Bind {
                addr: config.listen,
                source,
            })?;
        let destination = resolve(&config.destination).await?;

        info!(
            listen = %socket.local_addr()?,
            %destination,
            "UDP relay listening"
        );
        Ok(Self {
            config,
            socket: Arc::new(socket),
            destination,
            stats: Arc::new(RwLock::new(RelayServerStats::default())),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    pub fn stats(&self) -> RelayServerStats {
        self.stats.read().clone()
    }

    /// Relay datagrams until `shutdown` flips to `true`
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), RelayServerError> {
        let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();
        let ctx = SessionContext {
            downstream: self.socket.clone(),
            destination: self.destination,
            idle_timeout: self.config.idle_timeout(),
            max_datagram_size: self.config.max_datagram_size,
            stats: self.stats.clone(),
            closed: closed_tx,
        };
        let mut sessions: HashMap<SocketAddr, RelaySession> = HashMap::new();
        let mut next_session = 0u64;
        let mut buf = vec![0u8; self.config.max_datagram_size];

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => {
                    let (len, peer) = match received {
                        Ok(received) => received,
                        Err(e) => {
                            // ICMP errors from a previous send surface here on some platforms
                            warn!(target: "relay", "Relay receive failed: {}", e);
                            continue;
                        }
                    };
                    let payload = &buf[..len];
                    trace!(target: "relay", %peer, len, payload = %hex::encode(payload), "> downstream");

                    if !sessions.contains_key(&peer) {
                        next_session += 1;
                        match RelaySession::open(next_session, peer, &ctx).await {
                            Ok(session) => {
                                sessions.insert(peer, session);
                                let mut stats = self.stats.write();
                                stats.sessions_opened += 1;
                                stats.sessions_active = sessions.len();
                            }
                            Err(e) => {
                                warn!(target: "relay", %peer, "Failed to open upstream session: {}", e);
                                continue;
                            }
                        }
                    }

                    let Some(session) = sessions.get(&peer) else { continue };
                    match session.forward(payload).await {
                        Ok(_) => {
                            debug!(target: "relay", %peer, bytes = len, "Forwarded datagram upstream");
                            let mut stats = self.stats.write();
                            stats.datagrams_upstream += 1;
                            stats.bytes_upstream += len as u64;
                        }
                        Err(e) => warn!(target: "relay", %peer, "Failed to forward datagram: {}", e),
                    }
                }
                Some((peer, id)) = closed_rx.recv() => {
                    if sessions.get(&peer).map(RelaySession::id) == Some(id) {
                        sessions.remove(&peer);
                        self.stats.write().sessions_active = sessions.len();
                        debug!(target: "relay", %peer, "Relay session closed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        sessions.clear();
        self.stats.write().sessions_active = 0;
        info!("UDP relay stopped");
        Ok(())
    }
}

async fn resolve(destination: &str) -> Result<SocketAddr, RelayServerError> {
    let mut addrs = tokio::net::lookup_host(destination)
        .await
        .map_err(|e| RelayServerError::Resolve {
            destination: destination.to_string(),
            reason: e.to_string(),
        })?;
    addrs.next().ok_or_else(|| RelayServerError::Resolve {
        destination: destination.to_string(),
        reason: "no addresses returned".to_string(),
    })
}
