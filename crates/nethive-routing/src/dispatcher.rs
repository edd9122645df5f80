//! The route dispatcher (C4, §4.4): per-packet outbound channel selection.

use std::sync::Arc;

use nethive_core::{DropReason, Payload, is_multicast};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::dialer::Dialer;
use crate::table::RouteTable;

/// Configuration knobs the dispatcher consults per packet.
#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    pub enable_broadcast: bool,
}

/// Runs the dispatcher loop: consume from `input`, resolve a destination
/// channel via the route table or the dialer, and non-blocking-send.
///
/// Never blocks on a slow peer; every send is try-send with drop-on-full.
pub async fn run_dispatcher(
    mut input: mpsc::Receiver<Payload>,
    table: Arc<RouteTable>,
    dialer: Arc<dyn Dialer>,
    config: DispatcherConfig,
) {
    while let Some(payload) = input.recv().await {
        dispatch_one(&payload, &table, dialer.as_ref(), config).await;
    }
    debug!("dispatcher input channel closed, exiting");
}

async fn dispatch_one(
    payload: &Payload,
    table: &RouteTable,
    dialer: &dyn Dialer,
    config: DispatcherConfig,
) {
    if is_multicast(&payload.dst) {
        if !config.enable_broadcast {
            debug!(dst = %payload.dst, "multicast disabled, dropping");
            return;
        }
        dispatch_multicast(payload, table, dialer).await;
        return;
    }

    if let Some(sender) = table.lookup_by_addr(&payload.dst) {
        try_send(&sender, payload.clone(), payload.dst.to_string());
        return;
    }

    match dialer.dial_by_addr(payload.dst).await {
        Some(sender) => {
            // `dial_by_addr` already memoizes `dst` under the channel it
            // returns, ordered ahead of the dial task it spawns. Memoizing
            // again here races that dial task's teardown on a no-candidate
            // failure: with no await between them on the multi-thread
            // runtime, this could re-insert a `byAddr` entry pointing at an
            // already-closed channel after teardown has run, blackholing
            // every later packet to `dst`.
            try_send(&sender, payload.clone(), payload.dst.to_string());
        }
        None => {
            warn!(dst = %payload.dst, reason = %DropReason::NoRoute, "dropping packet");
        }
    }
}

async fn dispatch_multicast(payload: &Payload, table: &RouteTable, dialer: &dyn Dialer) {
    // Deliberately does not memoize under the multicast address: an earlier
    // source variant conflated multicast groups with unicast memoization,
    // which is treated as a bug here and not reproduced.
    let self_id = match table.find_peer_by_addr(payload.src) {
        Some(id) => id,
        None => {
            // We don't know our own peer-id from the source address alone in
            // the general case; fall back to fanning out to every configured
            // peer. `peers_except` only excludes a peer when it can be
            // identified, which is the common case where LocalAddr matches
            // one of our own configured prefixes.
            for peer in table.policy().peers().copied().collect::<Vec<_>>() {
                let sender = dialer.dial_by_id(peer).await;
                try_send(&sender, payload.clone(), peer.to_string());
            }
            return;
        }
    };

    for peer in table.peers_except(&self_id) {
        let sender = dialer.dial_by_id(peer).await;
        try_send(&sender, payload.clone(), peer.to_string());
    }
}

fn try_send(sender: &mpsc::Sender<Payload>, payload: Payload, dst_label: String) {
    match sender.try_send(payload) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(dst = %dst_label, reason = %DropReason::Backpressure, "dropping packet");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            warn!(dst = %dst_label, "channel closed, dropping packet");
        }
    }
}
