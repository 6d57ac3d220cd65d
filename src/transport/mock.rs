//! Recording transport for tests.

use std::collections::HashSet;

use super::{Transport, TransportError};
use crate::accounting::{Packet, SecuredPacket};
use crate::link::{LinkKey, NodeId};
use crate::routing::RouteRequest;

/// Records every call; can be told to report busy or failing paths.
#[derive(Debug, Default)]
pub(crate) struct RecordingTransport {
    pub secured: Vec<SecuredPacket>,
    pub plain: Vec<(NodeId, Packet)>,
    pub charge_requests: Vec<(LinkKey, u64, u64)>,
    pub route_requests: Vec<RouteRequest>,
    /// Next hops that answer `Busy`.
    pub busy: HashSet<NodeId>,
    /// Links whose charge requests fail.
    pub failing_charge: HashSet<LinkKey>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for RecordingTransport {
    fn send_secured(&mut self, packet: &SecuredPacket) -> Result<(), TransportError> {
        if self.busy.contains(&packet.next_hop()) {
            return Err(TransportError::Busy(packet.next_hop()));
        }
        self.secured.push(packet.clone());
        Ok(())
    }

    fn send_plain(&mut self, next_hop: NodeId, packet: &Packet) -> Result<(), TransportError> {
        if self.busy.contains(&next_hop) {
            return Err(TransportError::Busy(next_hop));
        }
        self.plain.push((next_hop, packet.clone()));
        Ok(())
    }

    fn request_charge(&mut self, link: LinkKey, bytes: u64, now_ms: u64) -> Result<(), TransportError> {
        if self.failing_charge.contains(&link) {
            return Err(TransportError::ConnectionReset(link));
        }
        self.charge_requests.push((link, bytes, now_ms));
        Ok(())
    }

    fn send_route_request(&mut self, request: &RouteRequest) -> Result<(), TransportError> {
        self.route_requests.push(*request);
        Ok(())
    }
}
