//! Key-Aware Routing
//!
//! Route selection for secured traffic. The base protocols (proactive
//! distance-vector, reactive on-demand) keep their own discovery and their
//! own native ordering of candidate next hops; the key-aware extension
//! annotates each candidate with the state of the next-hop link's key
//! buffer and moves key-viable candidates to the front.
//!
//! ## Randomness
//!
//! Route-request jitter and sequence-number tie-breaks belong to the base
//! protocols. Each installed instance draws from its own stream, derived
//! from the run seed and a stream index handed out by the registry, so two
//! instances in one run never share or correlate draws. The extension
//! itself is deterministic.

mod annotation;
mod distance_vector;
mod key_aware;
mod on_demand;
mod registry;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::link::{LinkKey, NodeId};

pub use annotation::{KeyGrade, RouteKeyAnnotation};
pub use distance_vector::DistanceVector;
pub use key_aware::{KeyAwareRouting, RankedRoute, SecuredSelection};
pub use on_demand::OnDemand;
pub use registry::ProtocolRegistry;

/// Errors related to routing protocol setup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("no {0} routing protocol installed")]
    RoleNotInstalled(ProtocolRole),

    #[error("a {0} routing protocol is already installed")]
    RoleAlreadyInstalled(ProtocolRole),
}

/// Role a routing protocol plays on a node.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolRole {
    /// Periodic table exchange (distance-vector).
    #[default]
    Proactive,
    /// Discovery on demand.
    Reactive,
}

impl ProtocolRole {
    /// All roles in stream-assignment order.
    pub const ALL: [ProtocolRole; 2] = [ProtocolRole::Proactive, ProtocolRole::Reactive];
}

impl fmt::Display for ProtocolRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolRole::Proactive => write!(f, "proactive"),
            ProtocolRole::Reactive => write!(f, "reactive"),
        }
    }
}

/// A route: destination reached through a neighbor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RouteId {
    pub destination: NodeId,
    pub next_hop: NodeId,
}

impl RouteId {
    /// Create a route ID.
    pub fn new(destination: NodeId, next_hop: NodeId) -> Self {
        Self {
            destination,
            next_hop,
        }
    }

    /// The link this route leaves `local` through.
    pub fn link(&self, local: NodeId) -> LinkKey {
        LinkKey::new(local, self.next_hop)
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} via {}", self.destination, self.next_hop)
    }
}

/// A next hop offered by a base protocol, with its native metric.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteCandidate {
    pub route: RouteId,
    /// Hop count to the destination through this neighbor.
    pub hops: u8,
    /// Destination sequence number (freshness).
    pub seq: u32,
}

impl RouteCandidate {
    /// Create a candidate.
    pub fn new(destination: NodeId, next_hop: NodeId, hops: u8, seq: u32) -> Self {
        Self {
            route: RouteId::new(destination, next_hop),
            hops,
            seq,
        }
    }

    /// Neighbor this candidate goes through.
    pub fn next_hop(&self) -> NodeId {
        self.route.next_hop
    }
}

/// A route discovery request produced by a reactive protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteRequest {
    pub destination: NodeId,
    pub request_id: u32,
    /// When to broadcast, including jitter.
    pub send_at_ms: u64,
}

/// A base routing protocol the key-aware extension can attach to.
pub trait RoutingProtocol: fmt::Debug {
    /// Role this protocol fills.
    fn role(&self) -> ProtocolRole;

    /// Candidate next hops to `destination`, best first by native metric.
    ///
    /// Takes `&mut self` because ties may be broken from the instance's
    /// random stream.
    fn candidates(&mut self, destination: NodeId, now_ms: u64) -> Vec<RouteCandidate>;

    /// Reseed the instance's random stream(s) starting at `first_stream`.
    ///
    /// Returns the number of streams consumed.
    fn assign_streams(&mut self, seed: u64, first_stream: u64) -> u64;

    /// Forget every route through `next_hop` (its link went down).
    fn remove_next_hop(&mut self, next_hop: NodeId) -> usize;

    /// Start discovery for a destination with no known route.
    fn request_route(&mut self, _destination: NodeId, _now_ms: u64) -> Option<RouteRequest> {
        None
    }

    /// Drop routes that have aged out.
    fn purge_expired(&mut self, _now_ms: u64) -> usize {
        0
    }
}

/// Independent RNG for stream `stream` of run `seed`.
pub(crate) fn stream_rng(seed: u64, stream: u64) -> StdRng {
    // Spread stream indices so neighboring streams seed far apart.
    let mixed = seed ^ stream.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    StdRng::seed_from_u64(mixed)
}

/// Sort candidates by native metric: fresher sequence number first, then
/// fewer hops, then the given tie-break draw.
pub(crate) fn native_order(mut ranked: Vec<(RouteCandidate, u32)>) -> Vec<RouteCandidate> {
    ranked.sort_by(|(a, ta), (b, tb)| {
        b.seq
            .cmp(&a.seq)
            .then(a.hops.cmp(&b.hops))
            .then(ta.cmp(tb))
    });
    ranked.into_iter().map(|(c, _)| c).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_route_id_link() {
        let route = RouteId::new(NodeId::new(9), NodeId::new(2));
        assert_eq!(route.link(NodeId::new(1)), LinkKey::new(NodeId::new(2), NodeId::new(1)));
        assert_eq!(format!("{}", route), "node:9 via node:2");
    }

    #[test]
    fn test_role_serde_and_display() {
        let role: ProtocolRole = serde_yaml::from_str("reactive").unwrap();
        assert_eq!(role, ProtocolRole::Reactive);
        assert_eq!(format!("{}", ProtocolRole::Proactive), "proactive");
        assert_eq!(ProtocolRole::default(), ProtocolRole::Proactive);
    }

    #[test]
    fn test_native_order() {
        let d = NodeId::new(9);
        let ordered = native_order(vec![
            (RouteCandidate::new(d, NodeId::new(2), 3, 10), 0),
            (RouteCandidate::new(d, NodeId::new(3), 1, 8), 0),
            (RouteCandidate::new(d, NodeId::new(4), 2, 10), 5),
            (RouteCandidate::new(d, NodeId::new(5), 2, 10), 1),
        ]);
        let hops: Vec<_> = ordered.iter().map(|c| c.next_hop().as_u32()).collect();
        assert_eq!(hops, vec![5, 4, 2, 3]);
    }

    #[test]
    fn test_stream_rng_independent() {
        let mut a = stream_rng(7, 0);
        let mut b = stream_rng(7, 1);
        let mut a2 = stream_rng(7, 0);

        let xs: Vec<u64> = (0..4).map(|_| a.r#gen()).collect();
        let ys: Vec<u64> = (0..4).map(|_| b.r#gen()).collect();
        let xs2: Vec<u64> = (0..4).map(|_| a2.r#gen()).collect();

        assert_ne!(xs, ys);
        assert_eq!(xs, xs2);
    }
}
