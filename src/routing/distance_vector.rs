//! Proactive distance-vector route table.
//!
//! Table exchange itself happens outside this crate; advertisements that
//! arrive are fed in here. Entries are kept per next hop so several
//! candidates to one destination survive side by side.

use std::collections::BTreeMap;

use rand::Rng;
use rand::rngs::StdRng;
use tracing::debug;

use super::{ProtocolRole, RouteCandidate, RoutingProtocol, native_order, stream_rng};
use crate::link::NodeId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Entry {
    hops: u8,
    seq: u32,
    updated_at_ms: u64,
}

/// Distance-vector routing table with per-instance randomness.
#[derive(Debug)]
pub struct DistanceVector {
    local: NodeId,
    /// destination -> next hop -> entry
    table: BTreeMap<NodeId, BTreeMap<NodeId, Entry>>,
    max_jitter_ms: u64,
    rng: StdRng,
}

impl DistanceVector {
    /// Create an empty table for `local`.
    pub fn new(local: NodeId, max_jitter_ms: u64) -> Self {
        Self {
            local,
            table: BTreeMap::new(),
            max_jitter_ms,
            rng: stream_rng(0, 0),
        }
    }

    /// Install the one-hop route to a directly linked neighbor.
    pub fn add_neighbor(&mut self, neighbor: NodeId, seq: u32, now_ms: u64) -> bool {
        self.apply(neighbor, neighbor, 1, seq, now_ms)
    }

    /// Apply an advertisement from `from` that it reaches `destination` in
    /// `hops` hops with sequence number `seq`.
    ///
    /// Returns true when the table changed. An older sequence number from
    /// the same neighbor is ignored, as is a route to ourselves.
    pub fn on_advertisement(
        &mut self,
        from: NodeId,
        destination: NodeId,
        hops: u8,
        seq: u32,
        now_ms: u64,
    ) -> bool {
        self.apply(destination, from, hops.saturating_add(1), seq, now_ms)
    }

    fn apply(&mut self, destination: NodeId, next_hop: NodeId, hops: u8, seq: u32, now_ms: u64) -> bool {
        if destination == self.local || next_hop == self.local {
            return false;
        }

        let routes = self.table.entry(destination).or_default();
        if let Some(existing) = routes.get(&next_hop)
            && (seq < existing.seq || (seq == existing.seq && hops >= existing.hops))
        {
            return false;
        }

        routes.insert(
            next_hop,
            Entry {
                hops,
                seq,
                updated_at_ms: now_ms,
            },
        );
        debug!(
            destination = %destination,
            next_hop = %next_hop,
            hops,
            seq,
            "Distance-vector route updated"
        );
        true
    }

    /// Jitter to add to the next periodic update.
    pub fn update_jitter_ms(&mut self) -> u64 {
        self.rng.gen_range(0..=self.max_jitter_ms)
    }

    /// Number of destinations with at least one route.
    pub fn destinations(&self) -> usize {
        self.table.len()
    }

    /// When the route via `next_hop` was last refreshed.
    pub fn updated_at_ms(&self, destination: NodeId, next_hop: NodeId) -> Option<u64> {
        self.table
            .get(&destination)
            .and_then(|r| r.get(&next_hop))
            .map(|e| e.updated_at_ms)
    }
}

impl RoutingProtocol for DistanceVector {
    fn role(&self) -> ProtocolRole {
        ProtocolRole::Proactive
    }

    fn candidates(&mut self, destination: NodeId, _now_ms: u64) -> Vec<RouteCandidate> {
        let Some(routes) = self.table.get(&destination) else {
            return Vec::new();
        };
        let rng = &mut self.rng;
        let drawn = routes
            .iter()
            .map(|(next_hop, e)| {
                (
                    RouteCandidate::new(destination, *next_hop, e.hops, e.seq),
                    rng.r#gen::<u32>(),
                )
            })
            .collect();
        native_order(drawn)
    }

    fn assign_streams(&mut self, seed: u64, first_stream: u64) -> u64 {
        self.rng = stream_rng(seed, first_stream);
        1
    }

    fn remove_next_hop(&mut self, next_hop: NodeId) -> usize {
        let mut removed = 0;
        self.table.retain(|_, routes| {
            if routes.remove(&next_hop).is_some() {
                removed += 1;
            }
            !routes.is_empty()
        });
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(id: u32) -> NodeId {
        NodeId::new(id)
    }

    fn table() -> DistanceVector {
        let mut dv = DistanceVector::new(n(1), 10);
        dv.assign_streams(42, 0);
        dv
    }

    #[test]
    fn test_neighbor_route() {
        let mut dv = table();
        assert!(dv.add_neighbor(n(2), 0, 0));
        let c = dv.candidates(n(2), 0);
        assert_eq!(c, vec![RouteCandidate::new(n(2), n(2), 1, 0)]);
    }

    #[test]
    fn test_advertisement_adds_hop() {
        let mut dv = table();
        assert!(dv.on_advertisement(n(2), n(9), 2, 4, 100));
        let c = dv.candidates(n(9), 0);
        assert_eq!(c[0].hops, 3);
        assert_eq!(c[0].seq, 4);
        assert_eq!(dv.updated_at_ms(n(9), n(2)), Some(100));
    }

    #[test]
    fn test_stale_sequence_ignored() {
        let mut dv = table();
        dv.on_advertisement(n(2), n(9), 2, 10, 0);
        assert!(!dv.on_advertisement(n(2), n(9), 1, 8, 1));
        // Same seq, worse hops ignored; better hops accepted
        assert!(!dv.on_advertisement(n(2), n(9), 3, 10, 2));
        assert!(dv.on_advertisement(n(2), n(9), 0, 10, 3));
        assert_eq!(dv.candidates(n(9), 0)[0].hops, 1);
    }

    #[test]
    fn test_route_to_self_ignored() {
        let mut dv = table();
        assert!(!dv.on_advertisement(n(2), n(1), 1, 1, 0));
        assert_eq!(dv.destinations(), 0);
    }

    #[test]
    fn test_native_order_fewer_hops_first() {
        let mut dv = table();
        dv.on_advertisement(n(2), n(9), 3, 5, 0);
        dv.on_advertisement(n(3), n(9), 0, 5, 0);
        dv.on_advertisement(n(4), n(9), 1, 5, 0);

        let order: Vec<_> = dv.candidates(n(9), 0).iter().map(|c| c.next_hop()).collect();
        assert_eq!(order, vec![n(3), n(4), n(2)]);
    }

    #[test]
    fn test_remove_next_hop() {
        let mut dv = table();
        dv.add_neighbor(n(2), 0, 0);
        dv.on_advertisement(n(2), n(9), 1, 1, 0);
        dv.on_advertisement(n(3), n(9), 1, 1, 0);

        assert_eq!(dv.remove_next_hop(n(2)), 2);
        assert!(dv.candidates(n(2), 0).is_empty());
        assert_eq!(dv.candidates(n(9), 0).len(), 1);
        assert_eq!(dv.destinations(), 1);
    }

    #[test]
    fn test_jitter_reproducible_per_stream() {
        let mut a = DistanceVector::new(n(1), 1_000);
        let mut b = DistanceVector::new(n(1), 1_000);
        a.assign_streams(5, 3);
        b.assign_streams(5, 3);
        let ja: Vec<_> = (0..8).map(|_| a.update_jitter_ms()).collect();
        let jb: Vec<_> = (0..8).map(|_| b.update_jitter_ms()).collect();
        assert_eq!(ja, jb);
        assert!(ja.iter().all(|&j| j <= 1_000));
    }

    #[test]
    fn test_tie_break_deterministic_for_seed() {
        let build = || {
            let mut dv = DistanceVector::new(n(1), 0);
            dv.assign_streams(11, 0);
            for hop in 2..8 {
                dv.on_advertisement(n(hop), n(99), 1, 1, 0);
            }
            dv
        };
        let mut a = build();
        let mut b = build();
        for _ in 0..5 {
            assert_eq!(a.candidates(n(99), 0), b.candidates(n(99), 0));
        }
    }
}
