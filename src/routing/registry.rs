//! Typed registry of the routing protocols installed on a node.
//!
//! One slot per [`ProtocolRole`], filled at setup. Lookups go straight to
//! the slot; nothing is searched per packet.

use tracing::debug;

use super::{DistanceVector, OnDemand, ProtocolRole, RoutingError, RoutingProtocol};
use crate::link::NodeId;

/// Routing protocols installed on a node, keyed by role.
#[derive(Debug, Default)]
pub struct ProtocolRegistry {
    proactive: Option<DistanceVector>,
    reactive: Option<OnDemand>,
}

impl ProtocolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the proactive protocol.
    pub fn install_proactive(&mut self, protocol: DistanceVector) -> Result<(), RoutingError> {
        if self.proactive.is_some() {
            return Err(RoutingError::RoleAlreadyInstalled(ProtocolRole::Proactive));
        }
        self.proactive = Some(protocol);
        Ok(())
    }

    /// Install the reactive protocol.
    pub fn install_reactive(&mut self, protocol: OnDemand) -> Result<(), RoutingError> {
        if self.reactive.is_some() {
            return Err(RoutingError::RoleAlreadyInstalled(ProtocolRole::Reactive));
        }
        self.reactive = Some(protocol);
        Ok(())
    }

    /// Check whether a role is filled.
    pub fn is_installed(&self, role: ProtocolRole) -> bool {
        match role {
            ProtocolRole::Proactive => self.proactive.is_some(),
            ProtocolRole::Reactive => self.reactive.is_some(),
        }
    }

    /// The protocol filling `role`.
    pub fn get_mut(&mut self, role: ProtocolRole) -> Result<&mut dyn RoutingProtocol, RoutingError> {
        let protocol: Option<&mut dyn RoutingProtocol> = match role {
            ProtocolRole::Proactive => self.proactive.as_mut().map(|p| p as _),
            ProtocolRole::Reactive => self.reactive.as_mut().map(|p| p as _),
        };
        protocol.ok_or(RoutingError::RoleNotInstalled(role))
    }

    /// Typed access to the proactive protocol.
    pub fn distance_vector_mut(&mut self) -> Option<&mut DistanceVector> {
        self.proactive.as_mut()
    }

    /// Typed access to the reactive protocol.
    pub fn on_demand_mut(&mut self) -> Option<&mut OnDemand> {
        self.reactive.as_mut()
    }

    /// Give each installed protocol its own random streams.
    ///
    /// Streams are handed out in role order starting at `first_stream`.
    /// Returns the next unused stream index.
    pub fn assign_streams(&mut self, seed: u64, first_stream: u64) -> u64 {
        let mut stream = first_stream;
        for role in ProtocolRole::ALL {
            if let Ok(protocol) = self.get_mut(role) {
                let used = protocol.assign_streams(seed, stream);
                debug!(role = %role, first_stream = stream, used, "Assigned random streams");
                stream += used;
            }
        }
        stream
    }

    /// Forget routes through `next_hop` in every installed protocol.
    pub fn remove_next_hop(&mut self, next_hop: NodeId) -> usize {
        ProtocolRole::ALL
            .into_iter()
            .filter_map(|role| self.get_mut(role).ok().map(|p| p.remove_next_hop(next_hop)))
            .sum()
    }

    /// Age out routes in every installed protocol.
    pub fn purge_expired(&mut self, now_ms: u64) -> usize {
        ProtocolRole::ALL
            .into_iter()
            .filter_map(|role| self.get_mut(role).ok().map(|p| p.purge_expired(now_ms)))
            .sum()
    }
}
