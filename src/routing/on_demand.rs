//! Reactive on-demand route cache.
//!
//! Routes are learned from route replies and expire after a lifetime. A
//! lookup that finds nothing produces a route request whose broadcast time
//! carries random jitter from the instance's stream.

use std::collections::BTreeMap;

use rand::Rng;
use rand::rngs::StdRng;
use tracing::debug;

use super::{ProtocolRole, RouteCandidate, RouteRequest, RoutingProtocol, native_order, stream_rng};
use crate::config::RoutingConfig;
use crate::link::NodeId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Entry {
    hops: u8,
    seq: u32,
    expires_at_ms: u64,
}

impl Entry {
    fn is_expired(&self, now_ms: u64) -> bool {
        now_ms > self.expires_at_ms
    }
}

/// On-demand route cache with per-instance randomness.
#[derive(Debug)]
pub struct OnDemand {
    local: NodeId,
    /// destination -> next hop -> entry
    routes: BTreeMap<NodeId, BTreeMap<NodeId, Entry>>,
    lifetime_ms: u64,
    max_jitter_ms: u64,
    next_request_id: u32,
    rng: StdRng,
}

impl OnDemand {
    /// Create an empty cache for `local`.
    pub fn new(local: NodeId, config: &RoutingConfig) -> Self {
        Self {
            local,
            routes: BTreeMap::new(),
            lifetime_ms: config.route_lifetime_ms,
            max_jitter_ms: config.max_request_jitter_ms,
            next_request_id: 0,
            rng: stream_rng(0, 0),
        }
    }

    /// Learn a route from a reply relayed by `next_hop`.
    ///
    /// A reply with an older sequence number than the cached route through
    /// the same neighbor is ignored; otherwise the entry and its lifetime
    /// are refreshed.
    pub fn on_route_reply(
        &mut self,
        next_hop: NodeId,
        destination: NodeId,
        hops: u8,
        seq: u32,
        now_ms: u64,
    ) -> bool {
        if destination == self.local || next_hop == self.local {
            return false;
        }

        let routes = self.routes.entry(destination).or_default();
        if let Some(existing) = routes.get(&next_hop)
            && !existing.is_expired(now_ms)
            && seq < existing.seq
        {
            return false;
        }

        routes.insert(
            next_hop,
            Entry {
                hops,
                seq,
                expires_at_ms: now_ms.saturating_add(self.lifetime_ms),
            },
        );
        debug!(
            destination = %destination,
            next_hop = %next_hop,
            hops,
            seq,
            "On-demand route learned"
        );
        true
    }

    /// Number of destinations with cached routes (including expired).
    pub fn destinations(&self) -> usize {
        self.routes.len()
    }
}

impl RoutingProtocol for OnDemand {
    fn role(&self) -> ProtocolRole {
        ProtocolRole::Reactive
    }

    fn candidates(&mut self, destination: NodeId, now_ms: u64) -> Vec<RouteCandidate> {
        let Some(routes) = self.routes.get(&destination) else {
            return Vec::new();
        };
        let rng = &mut self.rng;
        let drawn = routes
            .iter()
            .filter(|(_, e)| !e.is_expired(now_ms))
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
        self.routes.retain(|_, routes| {
            if routes.remove(&next_hop).is_some() {
                removed += 1;
            }
            !routes.is_empty()
        });
        removed
    }

    fn request_route(&mut self, destination: NodeId, now_ms: u64) -> Option<RouteRequest> {
        if destination == self.local {
            return None;
        }
        let jitter = self.rng.gen_range(0..=self.max_jitter_ms);
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        Some(RouteRequest {
            destination,
            request_id,
            send_at_ms: now_ms.saturating_add(jitter),
        })
    }

    fn purge_expired(&mut self, now_ms: u64) -> usize {
        let mut purged = 0;
        self.routes.retain(|_, routes| {
            let before = routes.len();
            routes.retain(|_, e| !e.is_expired(now_ms));
            purged += before - routes.len();
            !routes.is_empty()
        });
        purged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(id: u32) -> NodeId {
        NodeId::new(id)
    }

    fn cache() -> OnDemand {
        let config = RoutingConfig {
            route_lifetime_ms: 1_000,
            max_request_jitter_ms: 20,
            ..RoutingConfig::default()
        };
        let mut od = OnDemand::new(n(1), &config);
        od.assign_streams(3, 1);
        od
    }

    #[test]
    fn test_reply_creates_route() {
        let mut od = cache();
        assert!(od.on_route_reply(n(2), n(9), 2, 7, 0));
        assert_eq!(
            od.candidates(n(9), 500),
            vec![RouteCandidate::new(n(9), n(2), 2, 7)]
        );
    }

    #[test]
    fn test_route_expires() {
        let mut od = cache();
        od.on_route_reply(n(2), n(9), 2, 7, 0);
        assert_eq!(od.candidates(n(9), 1_000).len(), 1);
        assert!(od.candidates(n(9), 1_001).is_empty());

        assert_eq!(od.purge_expired(1_001), 1);
        assert_eq!(od.destinations(), 0);
    }

    #[test]
    fn test_older_sequence_ignored_until_expired() {
        let mut od = cache();
        od.on_route_reply(n(2), n(9), 2, 7, 0);
        assert!(!od.on_route_reply(n(2), n(9), 1, 6, 100));
        // Once the cached route has expired any reply is taken
        assert!(od.on_route_reply(n(2), n(9), 1, 6, 2_000));
    }

    #[test]
    fn test_fresher_sequence_preferred() {
        let mut od = cache();
        od.on_route_reply(n(2), n(9), 1, 3, 0);
        od.on_route_reply(n(3), n(9), 4, 5, 0);
        let order: Vec<_> = od.candidates(n(9), 0).iter().map(|c| c.next_hop()).collect();
        assert_eq!(order, vec![n(3), n(2)]);
    }

    #[test]
    fn test_request_route_jitter_bounded() {
        let mut od = cache();
        let first = od.request_route(n(9), 100).unwrap();
        let second = od.request_route(n(9), 100).unwrap();

        assert_eq!(first.destination, n(9));
        assert!(first.send_at_ms >= 100 && first.send_at_ms <= 120);
        assert_eq!(second.request_id, first.request_id + 1);
        assert!(od.request_route(n(1), 0).is_none());
    }

    #[test]
    fn test_streams_do_not_correlate() {
        let config = RoutingConfig {
            max_request_jitter_ms: 1_000_000,
            ..RoutingConfig::default()
        };
        let mut a = OnDemand::new(n(1), &config);
        let mut b = OnDemand::new(n(1), &config);
        a.assign_streams(9, 0);
        b.assign_streams(9, 1);

        let ja: Vec<_> = (0..6).map(|_| a.request_route(n(5), 0).unwrap().send_at_ms).collect();
        let jb: Vec<_> = (0..6).map(|_| b.request_route(n(5), 0).unwrap().send_at_ms).collect();
        assert_ne!(ja, jb);
    }

    #[test]
    fn test_remove_next_hop() {
        let mut od = cache();
        od.on_route_reply(n(2), n(9), 1, 1, 0);
        od.on_route_reply(n(2), n(8), 1, 1, 0);
        assert_eq!(od.remove_next_hop(n(2)), 2);
        assert_eq!(od.destinations(), 0);
    }
}
