//! Static routing configuration: `PeerId -> prefix set` (§3, §4.2).

use std::collections::HashMap;
use std::net::IpAddr;

use ipnet::IpNet;
use thiserror::Error;

use crate::identity::PeerId;

/// Errors loading or validating a `RoutePolicy`.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("prefix {new} for peer {new_peer} overlaps prefix {existing} already assigned to peer {existing_peer}")]
    OverlappingPrefixes {
        new: IpNet,
        new_peer: PeerId,
        existing: IpNet,
        existing_peer: PeerId,
    },
}

/// The static configuration: a mapping `PeerId -> Prefix set`.
///
/// Loaded once at startup and immutable for the lifetime of the engine.
/// Overlapping prefixes across peers are not supported and are rejected at
/// construction time rather than resolved by scan order.
#[derive(Debug, Clone, Default)]
pub struct RoutePolicy {
    prefixes: HashMap<PeerId, Vec<IpNet>>,
}

impl RoutePolicy {
    /// Build a policy from a `PeerId -> prefixes` map, rejecting overlaps.
    pub fn build(entries: HashMap<PeerId, Vec<IpNet>>) -> Result<Self, PolicyError> {
        let mut flat: Vec<(PeerId, IpNet)> = Vec::new();
        for (peer, nets) in &entries {
            for net in nets {
                for (existing_peer, existing_net) in &flat {
                    if existing_peer != peer && nets_overlap(existing_net, net) {
                        return Err(PolicyError::OverlappingPrefixes {
                            new: *net,
                            new_peer: *peer,
                            existing: *existing_net,
                            existing_peer: *existing_peer,
                        });
                    }
                }
                flat.push((*peer, *net));
            }
        }
        Ok(Self { prefixes: entries })
    }

    /// Prefixes configured for a given peer, if any.
    pub fn prefixes_for(&self, peer: &PeerId) -> Option<&[IpNet]> {
        self.prefixes.get(peer).map(|v| v.as_slice())
    }

    /// Find the peer whose configured prefix contains `addr`.
    ///
    /// Scan order is unspecified; since overlaps are rejected at
    /// construction time there is at most one match.
    pub fn find_peer_by_addr(&self, addr: IpAddr) -> Option<PeerId> {
        self.prefixes
            .iter()
            .find(|(_, nets)| nets.iter().any(|n| n.contains(&addr)))
            .map(|(peer, _)| *peer)
    }

    /// All configured peer ids.
    pub fn peers(&self) -> impl Iterator<Item = &PeerId> {
        self.prefixes.keys()
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }
}

fn nets_overlap(a: &IpNet, b: &IpNet) -> bool {
    match (a, b) {
        (IpNet::V4(a), IpNet::V4(b)) => a.contains(&b.network()) || b.contains(&a.network()),
        (IpNet::V6(a), IpNet::V6(b)) => a.contains(&b.network()) || b.contains(&a.network()),
        _ => false,
    }
}
