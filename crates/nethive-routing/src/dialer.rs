//! The dispatcher-facing half of the peer dialer contract (C5).
//!
//! `nethive-transport` implements this trait; keeping it here (rather than
//! routing depending on transport) avoids a dependency cycle between the
//! route table and the dialer that populates it.

use std::net::IpAddr;

use async_trait::async_trait;
use nethive_core::PeerId;

use crate::table::ChannelSender;

/// On-demand peer connection establishment, as consumed by the dispatcher.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Resolve `addr` to a peer, reserve (or reuse) its channel, and kick off
    /// a dial if one isn't already running. Returns `None` if no configured
    /// prefix covers `addr` (*NoRoute*).
    async fn dial_by_addr(&self, addr: IpAddr) -> Option<ChannelSender>;

    /// Reserve (or reuse) a channel for a known peer id, for multicast fan-out.
    async fn dial_by_id(&self, id: PeerId) -> ChannelSender;
}
