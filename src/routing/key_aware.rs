//! Key-aware route ranking.
//!
//! Attached once to a node's base protocol. For each candidate next hop it
//! reads the live state of the next-hop link's key buffer, records an
//! annotation, and reorders candidates so key-viable ones come first.
//! Within the viable and non-viable groups the base protocol's native
//! order is kept.
//!
//! Annotations are recomputed on every use from the buffer itself, so a
//! cached copy of `current` is never trusted for a decision. The recorded
//! annotations are dropped when a buffer crosses its threshold and when a
//! new epoch starts.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, info};

use super::{RouteCandidate, RouteId, RouteKeyAnnotation};
use crate::accounting::TrafficClass;
use crate::buffer::LevelChange;
use crate::config::RoutingConfig;
use crate::link::{LinkKey, LinkRegistry, NodeId};

/// A candidate with its key annotation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RankedRoute {
    pub candidate: RouteCandidate,
    pub annotation: RouteKeyAnnotation,
}

/// Result of choosing routes for a secured packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SecuredSelection {
    /// Viable routes, best first.
    Routes(Vec<RankedRoute>),
    /// Routes exist but none can carry secured traffic.
    ///
    /// The destination is marked unreachable for secured traffic; the
    /// routes are kept for best-effort use.
    NoViableRoute { best_effort: Vec<RankedRoute> },
    /// The base protocol knows no route at all.
    NoRoute,
}

/// Key-awareness extension over a base routing protocol.
#[derive(Clone, Debug)]
pub struct KeyAwareRouting {
    local: NodeId,
    secured_min_bytes: u64,
    best_effort_min_bytes: u64,
    epoch_ms: u64,
    epoch: u64,
    epoch_started_ms: u64,
    annotations: HashMap<(RouteId, TrafficClass), RouteKeyAnnotation>,
    unreachable_secured: BTreeSet<NodeId>,
}

impl KeyAwareRouting {
    /// Attach key awareness for node `local` using `routing.*`.
    pub fn attach(local: NodeId, config: &RoutingConfig) -> Self {
        info!(
            node = %local,
            protocol = %config.protocol,
            secured_min_bytes = config.secured_min_bytes,
            epoch_ms = config.epoch_ms,
            "Key-aware routing attached"
        );
        Self {
            local,
            secured_min_bytes: config.secured_min_bytes,
            best_effort_min_bytes: config.best_effort_min_bytes,
            epoch_ms: config.epoch_ms,
            epoch: 0,
            epoch_started_ms: 0,
            annotations: HashMap::new(),
            unreachable_secured: BTreeSet::new(),
        }
    }

    /// Minimum buffer level required for a class.
    pub fn min_bytes(&self, class: TrafficClass) -> u64 {
        match class {
            TrafficClass::Secured => self.secured_min_bytes,
            TrafficClass::BestEffort => self.best_effort_min_bytes,
        }
    }

    /// Current annotation epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Annotate one route from the live buffer state.
    ///
    /// Reads the buffer; never debits or credits it.
    pub fn annotate_route(
        &mut self,
        route: RouteId,
        class: TrafficClass,
        links: &LinkRegistry,
        now_ms: u64,
    ) -> RouteKeyAnnotation {
        let buffer = links.buffer(&route.link(self.local));
        let annotation = RouteKeyAnnotation::evaluate(
            route,
            class,
            buffer,
            self.min_bytes(class),
            now_ms,
            self.epoch,
        );
        self.annotations.insert((route, class), annotation);
        annotation
    }

    /// Whether `route` can carry `class` right now.
    pub fn is_viable(
        &mut self,
        route: RouteId,
        class: TrafficClass,
        links: &LinkRegistry,
        now_ms: u64,
    ) -> bool {
        self.annotate_route(route, class, links, now_ms).viable
    }

    /// Annotate and reorder candidates: viable first, native order kept
    /// inside each group.
    pub fn rank(
        &mut self,
        candidates: Vec<RouteCandidate>,
        class: TrafficClass,
        links: &LinkRegistry,
        now_ms: u64,
    ) -> Vec<RankedRoute> {
        let mut ranked: Vec<RankedRoute> = candidates
            .into_iter()
            .map(|candidate| RankedRoute {
                candidate,
                annotation: self.annotate_route(candidate.route, class, links, now_ms),
            })
            .collect();
        // Stable sort keeps native order within each group
        ranked.sort_by_key(|r| !r.annotation.viable);
        ranked
    }

    /// Pick routes for a secured packet to `destination`.
    ///
    /// Marks the destination unreachable for secured traffic when routes
    /// exist but none is viable, and clears the mark once one is.
    pub fn select_secured(
        &mut self,
        destination: NodeId,
        candidates: Vec<RouteCandidate>,
        links: &LinkRegistry,
        now_ms: u64,
    ) -> SecuredSelection {
        if candidates.is_empty() {
            return SecuredSelection::NoRoute;
        }

        let ranked = self.rank(candidates, TrafficClass::Secured, links, now_ms);
        let viable: Vec<RankedRoute> = ranked
            .iter()
            .copied()
            .filter(|r| r.annotation.viable)
            .collect();

        if viable.is_empty() {
            self.mark_unreachable_for_secured(destination);
            return SecuredSelection::NoViableRoute {
                best_effort: ranked,
            };
        }

        if self.unreachable_secured.remove(&destination) {
            info!(destination = %destination, "Key-viable route available again");
        }
        SecuredSelection::Routes(viable)
    }

    /// Mark `destination` unreachable for secured traffic.
    ///
    /// Used by `select_secured` when no route is viable, and by callers
    /// whose every viable route then failed to pay for the packet. Returns
    /// false if it was already marked.
    pub fn mark_unreachable_for_secured(&mut self, destination: NodeId) -> bool {
        let newly = self.unreachable_secured.insert(destination);
        if newly {
            info!(
                destination = %destination,
                "No key-viable route; destination unreachable for secured traffic"
            );
        }
        newly
    }

    /// Whether `destination` is currently marked unreachable for secured
    /// traffic.
    pub fn is_unreachable_for_secured(&self, destination: NodeId) -> bool {
        self.unreachable_secured.contains(&destination)
    }

    /// Last recorded annotation for a route, if from the current epoch.
    pub fn annotation(&self, route: RouteId, class: TrafficClass) -> Option<&RouteKeyAnnotation> {
        self.annotations
            .get(&(route, class))
            .filter(|a| a.epoch == self.epoch)
    }

    /// Drop annotations for routes over the link that crossed threshold.
    ///
    /// Returns the number of annotations dropped.
    pub fn on_level_change(&mut self, change: &LevelChange) -> usize {
        let dropped = self.forget_link(&change.link);
        debug!(
            link = %change.link,
            level = %change.level,
            dropped,
            "Route annotations invalidated"
        );
        dropped
    }

    /// Drop annotations for routes over `link`.
    pub fn forget_link(&mut self, link: &LinkKey) -> usize {
        let local = self.local;
        let before = self.annotations.len();
        self.annotations.retain(|(route, _), _| route.link(local) != *link);
        before - self.annotations.len()
    }

    /// Start a new epoch if the current one has run `routing.epoch_ms`.
    ///
    /// An epoch length of 0 disables periodic epochs.
    pub fn maybe_new_epoch(&mut self, now_ms: u64) -> bool {
        if self.epoch_ms == 0 || now_ms.saturating_sub(self.epoch_started_ms) < self.epoch_ms {
            return false;
        }
        self.new_epoch(now_ms);
        true
    }

    /// Start a new epoch, discarding every recorded annotation.
    pub fn new_epoch(&mut self, now_ms: u64) {
        self.epoch += 1;
        self.epoch_started_ms = now_ms;
        self.annotations.clear();
        debug!(epoch = self.epoch, "Route annotation epoch started");
    }
}
