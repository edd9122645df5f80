//! The concurrent route table (C2, §4.2).

use std::net::IpAddr;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use nethive_core::{PeerId, Payload, RoutePolicy};
use tokio::sync::mpsc;
use tracing::debug;

/// Sending half of a per-peer packet channel.
pub type ChannelSender = mpsc::Sender<Payload>;
/// Receiving half of a per-peer packet channel.
pub type ChannelReceiver = mpsc::Receiver<Payload>;

/// Concurrent mapping from overlay destinations and peer identities to the
/// live packet channel serving them.
///
/// Every operation is a single-key `DashMap` operation; there are no
/// cross-map transactions. `install_session` is the one operation that must
/// be atomic (Invariant 2, Testable Property 6) and uses `DashMap::entry`
/// rather than a plain check-then-`insert`.
pub struct RouteTable {
    policy: RoutePolicy,
    by_id: DashMap<PeerId, ChannelSender>,
    by_addr: DashMap<IpAddr, ChannelSender>,
    chan_size: usize,
}

impl RouteTable {
    /// Build a route table from a loaded, validated policy.
    pub fn new(policy: RoutePolicy, chan_size: usize) -> Self {
        Self {
            policy,
            by_id: DashMap::new(),
            by_addr: DashMap::new(),
            chan_size,
        }
    }

    pub fn policy(&self) -> &RoutePolicy {
        &self.policy
    }

    pub fn chan_size(&self) -> usize {
        self.chan_size
    }

    /// O(1) probe of `byAddr`.
    pub fn lookup_by_addr(&self, addr: &IpAddr) -> Option<ChannelSender> {
        self.by_addr.get(addr).map(|e| e.clone())
    }

    /// O(1) probe of `byId`.
    pub fn lookup_by_peer(&self, id: &PeerId) -> Option<ChannelSender> {
        self.by_id.get(id).map(|e| e.clone())
    }

    /// Scan `prefixes` for containment; at most one match since overlapping
    /// prefixes are rejected at policy-build time.
    pub fn find_peer_by_addr(&self, addr: IpAddr) -> Option<PeerId> {
        self.policy.find_peer_by_addr(addr)
    }

    /// Atomic check-and-insert on `byId`. Returns the channel that ended up
    /// installed — the caller's `sender` if no session existed yet, or the
    /// existing one if a race was lost.
    ///
    /// `DashMap::entry` locks the relevant shard for the duration of the
    /// closure, which is what makes this atomic where a separate
    /// `get`-then-`insert` pair would race.
    pub fn install_session(&self, id: PeerId, sender: ChannelSender) -> (ChannelSender, bool) {
        match self.by_id.entry(id) {
            Entry::Occupied(existing) => (existing.get().clone(), false),
            Entry::Vacant(slot) => {
                slot.insert(sender.clone());
                (sender, true)
            }
        }
    }

    /// Best-effort store in `byAddr`.
    pub fn memoize(&self, addr: IpAddr, sender: ChannelSender) {
        self.by_addr.insert(addr, sender);
    }

    /// Remove `byId[id]` and every `byAddr` entry covered by `id`'s prefixes.
    /// Safe to call when no session exists.
    pub fn teardown(&self, id: &PeerId) {
        self.by_id.remove(id);
        if let Some(prefixes) = self.policy.prefixes_for(id) {
            let stale: Vec<IpAddr> = self
                .by_addr
                .iter()
                .filter(|entry| prefixes.iter().any(|p| p.contains(entry.key())))
                .map(|entry| *entry.key())
                .collect();
            for addr in stale {
                self.by_addr.remove(&addr);
            }
        }
        debug!(peer = %id, "route table entries torn down");
    }

    /// All configured peers except `exclude`, for multicast fan-out.
    pub fn peers_except(&self, exclude: &PeerId) -> Vec<PeerId> {
        self.policy.peers().filter(|p| *p != exclude).copied().collect()
    }
}
