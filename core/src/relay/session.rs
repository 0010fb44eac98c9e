//! Per-device upstream session

use super::server::RelayServerStats;
use parking_lot::{Mutex, RwLock};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Shared state a session needs from the server
pub(crate) struct SessionContext {
    pub downstream: Arc<UdpSocket>,
    pub destination: SocketAddr,
    pub idle_timeout: Duration,
    pub max_datagram_size: usize,
    pub stats: Arc<RwLock<RelayServerStats>>,
    pub closed: mpsc::UnboundedSender<(SocketAddr, u64)>,
}

/// One client's dedicated upstream socket and its reply pump
pub(crate) struct RelaySession {
    id: u64,
    upstream: Arc<UdpSocket>,
    last_activity: Arc<Mutex<Instant>>,
    pump: JoinHandle<()>,
}

impl RelaySession {
    /// Connect a fresh upstream socket for `peer` and start pumping replies
    pub(crate) async fn open(id: u64, peer: SocketAddr, ctx: &SessionContext) -> io::Result<Self> {
        let bind_addr = match ctx.destination {
            SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };
        let upstream = Arc::new(UdpSocket::bind(bind_addr).await?);
        upstream.connect(ctx.destination).await?;

        let last_activity = Arc::new(Mutex::new(Instant::now()));
        let pump = tokio::spawn(pump_replies(
            id,
            peer,
            upstream.clone(),
            ctx.downstream.clone(),
            last_activity.clone(),
            ctx.idle_timeout,
            ctx.max_datagram_size,
            ctx.stats.clone(),
            ctx.closed.clone(),
        ));

        debug!(target: "relay", %peer, session = id, upstream = ?upstream.local_addr().ok(), "Opened relay session");
        Ok(Self {
            id,
            upstream,
            last_activity,
            pump,
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Send a client datagram upstream
    pub(crate) async fn forward(&self, payload: &[u8]) -> io::Result<usize> {
        *self.last_activity.lock() = Instant::now();
        self.upstream.send(payload).await
    }
}

impl Drop for RelaySession {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[allow(clippy::too_many_arguments)]
async fn pump_replies(
    id: u64,
    peer: SocketAddr,
    upstream: Arc<UdpSocket>,
    downstream: Arc<UdpSocket>,
    last_activity: Arc<Mutex<Instant>>,
    idle_timeout: Duration,
    max_datagram_size: usize,
    stats: Arc<RwLock<RelayServerStats>>,
    closed: mpsc::UnboundedSender<(SocketAddr, u64)>,
) {
    let mut buf = vec![0u8; max_datagram_size];
    loop {
        let idle_for = last_activity.lock().elapsed();
        if idle_for >= idle_timeout {
            debug!(target: "relay", %peer, session = id, "Relay session idle, closing");
            break;
        }

        match tokio::time::timeout(idle_timeout - idle_for, upstream.recv(&mut buf)).await {
            Err(_) => continue,
            Ok(Ok(len)) => {
                *last_activity.lock() = Instant::now();
                let payload = &buf[..len];
                trace!(target: "relay", %peer, len, payload = %hex::encode(payload), "< upstream");
                match downstream.send_to(payload, peer).await {
                    Ok(_) => {
                        debug!(target: "relay", %peer, bytes = len, "Delivered reply downstream");
                        let mut stats = stats.write();
                        stats.datagrams_downstream += 1;
                        stats.bytes_downstream += len as u64;
                    }
                    Err(e) => warn!(target: "relay", %peer, "Failed to deliver reply: {}", e),
                }
            }
            Ok(Err(e)) => {
                warn!(target: "relay", %peer, session = id, "Upstream receive failed: {}", e);
                break;
            }
        }
    }
    let _ = closed.send((peer, id));
}
