//! The peer dialer: on-demand address resolution, single-flight dialing,
//! and handoff to a stream session.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use iroh::endpoint::Connection;
use iroh::protocol::{AcceptError, ProtocolHandler};
use iroh::{Endpoint, EndpointAddr};
use nethive_core::{PeerId, VPN_ALPN};
use nethive_routing::{ChannelSender, Dialer, RouteTable};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::discovery::Discovery;
use crate::session;

/// Per-dial timeout; the transport itself bounds connection setup beyond this.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Establishes outbound peer connections on demand and wires them into the
/// shared route table. Always used behind an `Arc`, since the spawned dial
/// task and the inbound accept loop both need to outlive the call that
/// created them.
pub struct PeerDialer {
    endpoint: Endpoint,
    table: Arc<RouteTable>,
    discovery: Arc<Discovery>,
    interface_write: mpsc::Sender<nethive_core::Payload>,
}

impl PeerDialer {
    pub fn new(
        endpoint: Endpoint,
        table: Arc<RouteTable>,
        discovery: Arc<Discovery>,
        interface_write: mpsc::Sender<nethive_core::Payload>,
    ) -> Self {
        Self {
            endpoint,
            table,
            discovery,
            interface_write,
        }
    }

    /// Candidate addresses for `id`: the peerstore (prior connections / mDNS
    /// plus anything learned over gossip). `Discovery::find_peers` already
    /// folds both sources.
    fn resolve_candidates(&self, id: PeerId) -> Vec<EndpointAddr> {
        self.discovery.find_peers(&id).into_iter().collect()
    }

    /// The dial task: resolve addresses, race connection attempts, hand off
    /// to a stream session, and tear down on completion or total failure.
    async fn run_dial(self: Arc<Self>, id: PeerId, channel: mpsc::Receiver<nethive_core::Payload>) {
        let candidates = self.resolve_candidates(id);
        if candidates.is_empty() {
            warn!(peer = %id, "no dial candidates, tearing down");
            self.table.teardown(&id);
            return;
        }

        for addr in candidates {
            match tokio::time::timeout(CONNECT_TIMEOUT, self.endpoint.connect(addr, VPN_ALPN)).await
            {
                Ok(Ok(conn)) => {
                    info!(peer = %id, "outbound connection established");
                    match conn.open_bi().await {
                        Ok((send, recv)) => {
                            session::run_session(send, recv, channel, self.interface_write.clone())
                                .await;
                            self.table.teardown(&id);
                            return;
                        }
                        Err(err) => {
                            warn!(peer = %id, error = %err, "failed to open bidi stream");
                        }
                    }
                }
                Ok(Err(err)) => {
                    warn!(peer = %id, error = %err, "dial attempt failed");
                }
                Err(_) => {
                    warn!(peer = %id, "dial attempt timed out");
                }
            }
        }

        warn!(peer = %id, "all dial candidates exhausted, tearing down");
        self.table.teardown(&id);
    }

    /// Accept one inbound connection on the VPN ALPN.
    ///
    /// Closes the connection immediately if the remote peer isn't in
    /// `prefixes`, or if an outbound session to it already won the race —
    /// `install_session`'s atomic check-and-insert is what decides the
    /// winner deterministically (whichever was installed first).
    async fn accept_inbound(self: Arc<Self>, connection: Connection) {
        let peer_id = PeerId::new(connection.remote_id());

        if self.table.policy().prefixes_for(&peer_id).is_none() {
            debug!(peer = %peer_id, "inbound peer not in configured routes, closing");
            connection.close(0u32.into(), b"unknown peer");
            return;
        }

        let (sender, receiver) = mpsc::channel(self.table.chan_size());
        let (_installed, won) = self.table.install_session(peer_id, sender);
        if !won {
            debug!(peer = %peer_id, "outbound session already active, closing inbound");
            connection.close(0u32.into(), b"session already active");
            return;
        }

        let (send, recv) = match connection.accept_bi().await {
            Ok(streams) => streams,
            Err(err) => {
                warn!(peer = %peer_id, error = %err, "failed to accept bidi stream");
                self.table.teardown(&peer_id);
                return;
            }
        };

        info!(peer = %peer_id, "inbound session established");
        session::run_session(send, recv, receiver, self.interface_write.clone()).await;
        self.table.teardown(&peer_id);
    }
}

/// Implements the dispatcher-facing [`Dialer`] contract over an
/// `Arc<PeerDialer>`, so dial tasks spawned from it can hold their own
/// strong reference independent of the caller's lifetime.
pub struct ArcDialer(pub Arc<PeerDialer>);

impl ArcDialer {
    pub fn new(inner: Arc<PeerDialer>) -> Self {
        Self(inner)
    }

    /// Drive the inbound-accept loop for `router`'s VPN protocol connections
    /// until the endpoint closes. Intended to be spawned as its own task.
    pub async fn run_inbound_accept_loop(&self, mut connections: mpsc::Receiver<Connection>) {
        while let Some(connection) = connections.recv().await {
            let dialer = self.0.clone();
            tokio::spawn(async move { dialer.accept_inbound(connection).await });
        }
        debug!("inbound connection channel closed, accept loop exiting");
    }
}

#[async_trait]
impl Dialer for ArcDialer {
    async fn dial_by_addr(&self, addr: IpAddr) -> Option<ChannelSender> {
        let id = self.0.table.find_peer_by_addr(addr)?;
        if let Some(existing) = self.0.table.lookup_by_peer(&id) {
            self.0.table.memoize(addr, existing.clone());
            return Some(existing);
        }

        let (sender, receiver) = mpsc::channel(self.0.table.chan_size());
        let (installed, won) = self.0.table.install_session(id, sender);
        self.0.table.memoize(addr, installed.clone());

        if won {
            debug!(peer = %id, "spawning dial task");
            let dialer = self.0.clone();
            tokio::spawn(async move { dialer.run_dial(id, receiver).await });
        }
        Some(installed)
    }

    async fn dial_by_id(&self, id: PeerId) -> ChannelSender {
        if let Some(existing) = self.0.table.lookup_by_peer(&id) {
            return existing;
        }
        let (sender, receiver) = mpsc::channel(self.0.table.chan_size());
        let (installed, won) = self.0.table.install_session(id, sender);
        if won {
            let dialer = self.0.clone();
            tokio::spawn(async move { dialer.run_dial(id, receiver).await });
        }
        installed
    }
}

/// Forwards ALPN-matched inbound connections onto a channel the accept loop
/// above drains, rather than processing them inline in `accept`.
#[derive(Clone)]
pub struct InboundForwarder {
    sender: mpsc::Sender<Connection>,
}

impl InboundForwarder {
    pub fn new(sender: mpsc::Sender<Connection>) -> Self {
        Self { sender }
    }
}

impl ProtocolHandler for InboundForwarder {
    async fn accept(&self, connection: Connection) -> Result<(), AcceptError> {
        self.sender.send(connection).await.map_err(|_| {
            AcceptError::from(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "inbound connection channel closed",
            ))
        })?;
        Ok(())
    }
}
