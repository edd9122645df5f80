//! Discovery services: DHT-equivalent rendezvous, peerstore, mDNS.
//!
//! `iroh`/`iroh-gossip` provide pub/sub gossip over a topic, not a
//! Kademlia-style key-value DHT; `advertise(key)`/`find_peers(key)` are
//! modeled atop an `iroh-gossip` topic derived deterministically from the
//! rendezvous key.
//!
//! The rendezvous topic is split into sender/receiver halves on bootstrap
//! and a background task drives the receiver into `handle_message`, so
//! `find_peers` gets populated from the network as announcements arrive.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use iroh::EndpointAddr;
use iroh_gossip::api::{Event as GossipEvent, GossipSender};
use iroh_gossip::net::Gossip;
use iroh_gossip::proto::TopicId;
use n0_future::StreamExt;
use nethive_core::PeerId;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, warn};

use crate::error::{TransportError, TransportResult};

/// How often bootstrap is retried after every candidate has failed.
pub const BOOTSTRAP_RETRY_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// A presence announcement broadcast on the rendezvous topic.
///
/// Only the bare peer id travels over gossip, not a serialized `EndpointAddr`.
/// Once a peer id is known, `EndpointAddr::new(public_key)` plus iroh's own
/// discovery is sufficient to dial it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceAnnounce {
    pub peer_id: PeerId,
}

/// A cached peer, with the time it was last refreshed.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub peer_id: PeerId,
    pub last_seen_millis: i64,
}

/// Events the discovery service emits as peers come and go.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    Discovered(PeerInfo),
    Updated(PeerInfo),
}

/// The rendezvous topic id for a given key string (the base58 peer-id by convention).
pub fn topic_id_for_key(key: &str) -> TopicId {
    let mut topic = [0u8; 32];
    for (chunk_index, chunk) in topic.chunks_mut(8).enumerate() {
        let mut hasher = DefaultHasher::new();
        chunk_index.hash(&mut hasher);
        key.hash(&mut hasher);
        chunk.copy_from_slice(&hasher.finish().to_le_bytes());
    }
    TopicId::from(topic)
}

/// Advertises local presence and tracks peers discovered via gossip, serving
/// as the `advertise`/`find_peers` DHT-content-routing substitute.
pub struct Discovery {
    gossip: Gossip,
    local_peer_id: PeerId,
    sender: RwLock<Option<GossipSender>>,
    peerstore: DashMap<PeerId, PeerInfo>,
    event_tx: broadcast::Sender<PeerEvent>,
}

impl Discovery {
    pub fn new(gossip: Gossip, local_peer_id: PeerId) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            gossip,
            local_peer_id,
            sender: RwLock::new(None),
            peerstore: DashMap::new(),
            event_tx,
        }
    }

    /// Bootstrap onto the rendezvous topic for our own peer-id, dialing every
    /// configured bootstrap address concurrently and proceeding as soon as
    /// one succeeds. Retries periodically on total failure.
    ///
    /// Takes `Arc<Self>` because the gossip receive loop spawned here
    /// outlives this call.
    pub async fn bootstrap(self: Arc<Self>, bootstrap_peers: Vec<EndpointAddr>) -> TransportResult<()> {
        let topic_id = topic_id_for_key(&self.local_peer_id.to_base58());
        let bootstrap_ids = bootstrap_peers.iter().map(|a| a.id).collect::<Vec<_>>();

        loop {
            match self.gossip.subscribe(topic_id, bootstrap_ids.clone()).await {
                Ok(topic) => {
                    let (sender, receiver) = topic.split();
                    *self.sender.write().await = Some(sender);
                    info!(peer = %self.local_peer_id, "discovery bootstrapped");

                    let receive_loop_handle = self.clone();
                    tokio::spawn(async move { receive_loop_handle.run_receive_loop(receiver).await });

                    self.advertise().await?;
                    return Ok(());
                }
                Err(err) => {
                    warn!(error = %err, "bootstrap failed for all candidates, retrying later");
                    tokio::time::sleep(BOOTSTRAP_RETRY_INTERVAL).await;
                }
            }
        }
    }

    /// Drive gossip events on the rendezvous topic into the peerstore until
    /// the topic closes.
    async fn run_receive_loop(self: Arc<Self>, mut receiver: iroh_gossip::api::GossipReceiver) {
        loop {
            match receiver.try_next().await {
                Ok(Some(GossipEvent::Received(msg))) => self.handle_message(&msg.content),
                Ok(Some(GossipEvent::Lagged)) => {
                    warn!("gossip receiver lagged, some presence announcements were missed");
                }
                Ok(Some(GossipEvent::NeighborUp(_) | GossipEvent::NeighborDown(_))) => {}
                Ok(None) => {
                    debug!("gossip topic closed, discovery receive loop exiting");
                    return;
                }
                Err(err) => {
                    warn!(error = %err, "gossip receive error, discovery receive loop exiting");
                    return;
                }
            }
        }
    }

    /// Periodically announce that this host provides the rendezvous key
    /// equal to its own peer-id.
    pub async fn advertise(&self) -> TransportResult<()> {
        let mut guard = self.sender.write().await;
        let sender = guard.as_mut().ok_or_else(|| {
            TransportError::Gossip("advertise called before bootstrap".into())
        })?;

        let announce = PresenceAnnounce {
            peer_id: self.local_peer_id,
        };
        let bytes = postcard::to_allocvec(&announce)
            .map_err(|e| TransportError::Gossip(e.to_string()))?;
        sender
            .broadcast(bytes.into())
            .await
            .map_err(|e| TransportError::Gossip(e.to_string()))?;
        Ok(())
    }

    /// Find a peer advertising the rendezvous key equal to `peer_id`'s base58
    /// string, by consulting the peerstore populated from gossip
    /// announcements, and reconstruct a dialable `EndpointAddr` for it.
    pub fn find_peers(&self, peer_id: &PeerId) -> Option<EndpointAddr> {
        self.peerstore
            .get(peer_id)
            .map(|e| EndpointAddr::new(e.peer_id.public_key()))
    }

    /// Handle a raw gossip message payload (a postcard-encoded `PresenceAnnounce`).
    pub fn handle_message(&self, data: &[u8]) {
        let announce: PresenceAnnounce = match postcard::from_bytes(data) {
            Ok(a) => a,
            Err(err) => {
                debug!(error = %err, "ignoring malformed gossip message");
                return;
            }
        };
        if announce.peer_id == self.local_peer_id {
            return;
        }
        self.remember(announce.peer_id);
    }

    /// Record a peer learned via mDNS, gossip, or a prior connection.
    pub fn remember(&self, peer_id: PeerId) {
        let now = chrono::Utc::now().timestamp_millis();
        let is_new = !self.peerstore.contains_key(&peer_id);
        let info = PeerInfo {
            peer_id,
            last_seen_millis: now,
        };
        self.peerstore.insert(peer_id, info.clone());
        let event = if is_new {
            PeerEvent::Discovered(info)
        } else {
            PeerEvent::Updated(info)
        };
        let _ = self.event_tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.event_tx.subscribe()
    }

    /// Candidate addresses of currently-known peers, refreshed periodically
    /// for the auto-relay candidate source.
    pub fn relay_candidates(&self) -> Vec<EndpointAddr> {
        self.peerstore
            .iter()
            .map(|e| EndpointAddr::new(e.value().peer_id.public_key()))
            .collect()
    }
}
