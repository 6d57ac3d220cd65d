//! Transport Boundary
//!
//! The packet transport and the charging (key distribution) transport live
//! outside the core. The node hands them secured packets, plain packets,
//! charging requests and route requests; delivery and failure of charging
//! traffic come back through `Node::on_charge_delivered` and
//! `Node::on_charge_failed`.

#[cfg(test)]
pub(crate) mod mock;

use thiserror::Error;
use tracing::debug;

use crate::accounting::{Packet, SecuredPacket};
use crate::link::{LinkKey, NodeId};
use crate::routing::RouteRequest;

/// Errors reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The next hop cannot take a packet now; retry when it signals ready.
    #[error("transport busy toward {0}")]
    Busy(NodeId),

    #[error("{0} unreachable")]
    Unreachable(NodeId),

    #[error("connection reset on {0}")]
    ConnectionReset(LinkKey),

    #[error("send failed: {0}")]
    SendFailed(String),
}

impl TransportError {
    /// Check if the failure is temporary back-pressure.
    pub fn is_busy(&self) -> bool {
        matches!(self, TransportError::Busy(_))
    }
}

/// Outbound side of the external transports.
pub trait Transport {
    /// Send an encrypted packet to its next hop.
    fn send_secured(&mut self, packet: &SecuredPacket) -> Result<(), TransportError>;

    /// Send an unencrypted best-effort packet.
    fn send_plain(&mut self, next_hop: NodeId, packet: &Packet) -> Result<(), TransportError>;

    /// Ask the key distribution layer for `bytes` of fresh key on `link`.
    fn request_charge(&mut self, link: LinkKey, bytes: u64, now_ms: u64) -> Result<(), TransportError>;

    /// Broadcast a route discovery request.
    fn send_route_request(&mut self, request: &RouteRequest) -> Result<(), TransportError>;
}

/// Transport that accepts and discards everything.
///
/// Used where a node is brought up without a network, such as a
/// configuration check.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullTransport;

impl Transport for NullTransport {
    fn send_secured(&mut self, packet: &SecuredPacket) -> Result<(), TransportError> {
        debug!(packet = %packet.id(), next_hop = %packet.next_hop(), "Discarding secured packet");
        Ok(())
    }

    fn send_plain(&mut self, next_hop: NodeId, packet: &Packet) -> Result<(), TransportError> {
        debug!(packet = %packet.id, next_hop = %next_hop, "Discarding plain packet");
        Ok(())
    }

    fn request_charge(&mut self, link: LinkKey, bytes: u64, _now_ms: u64) -> Result<(), TransportError> {
        debug!(link = %link, bytes, "Discarding charge request");
        Ok(())
    }

    fn send_route_request(&mut self, request: &RouteRequest) -> Result<(), TransportError> {
        debug!(destination = %request.destination, "Discarding route request");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            format!("{}", TransportError::Busy(NodeId::new(2))),
            "transport busy toward node:2"
        );
        assert!(TransportError::Busy(NodeId::new(2)).is_busy());
        assert!(!TransportError::SendFailed("x".into()).is_busy());
    }

    #[test]
    fn test_null_transport_accepts() {
        let mut transport = NullTransport;
        let link = LinkKey::new(NodeId::new(1), NodeId::new(2));
        assert!(transport.request_charge(link, 10, 0).is_ok());
    }
}
