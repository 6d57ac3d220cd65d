//! Secured and best-effort send paths, plus the per-next-hop queues that
//! hold secured packets while the transport is busy.

use std::collections::VecDeque;

use super::{Node, NodeError, TimerEvent};
use crate::accounting::{Packet, PacketId, SecuredPacket, TrafficClass};
use crate::delay::{DelayExceeded, Release};
use crate::events::KeyEvent;
use crate::link::{LinkKey, NodeId};
use crate::routing::{RoutingProtocol, SecuredSelection};
use crate::sim::Scheduler;
use crate::transport::Transport;
use tracing::{debug, warn};

/// What happened to a packet handed to the node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// Handed to the transport.
    Sent { next_hop: NodeId, key_cost: u64 },
    /// Key debited; waiting for a busy next hop.
    Queued { next_hop: NodeId, key_cost: u64 },
    /// No route can carry secured traffic. The packet is returned
    /// untouched so the caller can downgrade or drop it.
    NoSecuredRoute(Packet),
    /// No route at all; a discovery request went out if the protocol
    /// supports one.
    NoRoute { packet: Packet, requested: bool },
}

impl SendOutcome {
    /// Next hop the packet left (or will leave) through.
    pub fn next_hop(&self) -> Option<NodeId> {
        match self {
            SendOutcome::Sent { next_hop, .. } | SendOutcome::Queued { next_hop, .. } => {
                Some(*next_hop)
            }
            _ => None,
        }
    }
}

impl<S, T> Node<S, T>
where
    S: Scheduler<TimerEvent>,
    T: Transport,
{
    /// Send a packet over a key-viable route, encrypted.
    ///
    /// Candidates are ranked with viable routes first. The accountant is
    /// tried on each viable candidate in order; an insufficient buffer
    /// moves on to the next one. The first successful debit fixes the
    /// route: the packet gets its delay bound (`max_delay_ms`, or the
    /// configured default) and goes to the transport, or into the next
    /// hop's queue if the transport is busy.
    pub fn send_secured(
        &mut self,
        mut packet: Packet,
        max_delay_ms: Option<u64>,
        now_ms: u64,
    ) -> Result<SendOutcome, NodeError> {
        self.require_running()?;
        let destination = packet.destination;

        let candidates = self.protocols.get_mut(self.role)?.candidates(destination, now_ms);
        if candidates.is_empty() {
            let requested = self.request_route(destination, now_ms);
            return Ok(SendOutcome::NoRoute { packet, requested });
        }

        let routes = match self
            .routing
            .select_secured(destination, candidates, &self.links, now_ms)
        {
            SecuredSelection::Routes(routes) => routes,
            SecuredSelection::NoViableRoute { .. } => {
                return Ok(self.no_secured_route(packet));
            }
            SecuredSelection::NoRoute => {
                return Ok(SendOutcome::NoRoute {
                    packet,
                    requested: false,
                });
            }
        };

        for ranked in routes {
            let next_hop = ranked.candidate.next_hop();
            let key = self.link_key(next_hop);
            let Some(link) = self.links.get_mut(&key) else {
                continue;
            };

            match self.accountant.prepare_for_send(packet, next_hop, link) {
                Ok(prepared) => {
                    let mut secured = prepared.packet;
                    if let Some(change) = prepared.level_change {
                        self.on_level_change(change, now_ms);
                    }
                    self.delay.tag(&mut secured, max_delay_ms, now_ms);
                    return self.dispatch(secured, now_ms);
                }
                Err(rejected) => {
                    debug!(
                        packet = %rejected.packet.id,
                        next_hop = %next_hop,
                        error = %rejected.error,
                        "Trying next route"
                    );
                    packet = rejected.packet;
                }
            }
        }

        // Every viable route was short of key for this packet.
        self.routing.mark_unreachable_for_secured(destination);
        Ok(self.no_secured_route(packet))
    }

    /// Send a packet unencrypted over the best native route.
    ///
    /// Spends no key. A busy transport is reported as an error; plain
    /// packets are not queued.
    pub fn send_best_effort(&mut self, packet: Packet, now_ms: u64) -> Result<SendOutcome, NodeError> {
        self.require_running()?;
        let destination = packet.destination;

        let candidates = self.protocols.get_mut(self.role)?.candidates(destination, now_ms);
        let ranked = self
            .routing
            .rank(candidates, TrafficClass::BestEffort, &self.links, now_ms);
        let Some(best) = ranked.into_iter().find(|r| r.annotation.viable) else {
            let requested = self.request_route(destination, now_ms);
            return Ok(SendOutcome::NoRoute { packet, requested });
        };

        let next_hop = best.candidate.next_hop();
        self.transport.send_plain(next_hop, &packet)?;
        debug!(packet = %packet.id, next_hop = %next_hop, "Best-effort packet sent");
        Ok(SendOutcome::Sent {
            next_hop,
            key_cost: 0,
        })
    }

    /// The transport toward `next_hop` can take packets again.
    ///
    /// Drains the queue oldest first through the delay check. Packets past
    /// their bound are dropped without refund. Stops early if the transport
    /// reports busy again. Returns the number of packets sent.
    pub fn on_link_ready(&mut self, next_hop: NodeId, now_ms: u64) -> usize {
        let Some(mut queue) = self.queues.remove(&next_hop) else {
            return 0;
        };

        let mut sent = 0;
        while let Some(packet) = queue.pop_front() {
            let id = packet.id();
            match self.delay.check_and_release(packet, now_ms) {
                Release::Expired(exceeded) => {
                    self.cancel_deadline(id);
                    self.record_expired(exceeded);
                }
                Release::Forward(packet) => match self.transport.send_secured(&packet) {
                    Ok(()) => {
                        self.cancel_deadline(id);
                        sent += 1;
                    }
                    Err(e) if e.is_busy() => {
                        queue.push_front(packet);
                        break;
                    }
                    Err(e) => {
                        self.cancel_deadline(id);
                        warn!(packet = %id, next_hop = %next_hop, error = %e, "Queued packet lost");
                    }
                },
            }
        }

        if !queue.is_empty() {
            self.queues.insert(next_hop, queue);
        }
        debug!(next_hop = %next_hop, sent, remaining = self.queued(next_hop), "Queue drained");
        sent
    }

    // === Internal ===

    fn dispatch(&mut self, packet: SecuredPacket, now_ms: u64) -> Result<SendOutcome, NodeError> {
        let next_hop = packet.next_hop();
        let key_cost = packet.key_cost();

        // Keep order behind packets already waiting for this hop.
        if self.queued(next_hop) > 0 {
            self.enqueue(packet);
            return Ok(SendOutcome::Queued { next_hop, key_cost });
        }

        match self.transport.send_secured(&packet) {
            Ok(()) => {
                debug!(packet = %packet.id(), next_hop = %next_hop, key_cost, now_ms, "Secured packet sent");
                Ok(SendOutcome::Sent { next_hop, key_cost })
            }
            Err(e) if e.is_busy() => {
                self.enqueue(packet);
                Ok(SendOutcome::Queued { next_hop, key_cost })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn enqueue(&mut self, packet: SecuredPacket) {
        let next_hop = packet.next_hop();
        self.arm_deadline(&packet, 0);
        debug!(packet = %packet.id(), next_hop = %next_hop, "Secured packet queued");
        self.queues.entry(next_hop).or_insert_with(VecDeque::new).push_back(packet);
    }

    /// Schedule the expiry timer for a queued packet, no earlier than
    /// `not_before_ms`.
    ///
    /// Expired means strictly past the bound, so the timer fires one ms
    /// after the deadline. A deadline saturated at `u64::MAX` can never be
    /// exceeded and gets no timer.
    fn arm_deadline(&mut self, packet: &SecuredPacket, not_before_ms: u64) {
        let Some(deadline) = packet.delay().and_then(|tag| tag.deadline_ms()) else {
            return;
        };
        let Some(at) = deadline.max(not_before_ms).checked_add(1) else {
            debug!(packet = %packet.id(), "Delay bound too large to expire; no deadline timer");
            return;
        };
        let timer = self.scheduler.schedule_at(
            at,
            TimerEvent::DelayDeadline {
                link: packet.link(),
                packet: packet.id(),
            },
        );
        self.delay.track_deadline(packet.id(), packet.link(), timer);
    }

    /// Deadline timer fired for a queued packet.
    pub(super) fn expire_queued(&mut self, link: LinkKey, packet: PacketId, now_ms: u64) {
        if self.delay.cancel_deadline(packet).is_none() {
            return;
        }
        let Some(next_hop) = link.other(self.id) else {
            return;
        };
        let Some(queue) = self.queues.get_mut(&next_hop) else {
            return;
        };
        let Some(pos) = queue.iter().position(|p| p.id() == packet) else {
            return;
        };
        let Some(queued) = queue.remove(pos) else {
            return;
        };

        match self.delay.check_and_release(queued, now_ms) {
            Release::Expired(exceeded) => self.record_expired(exceeded),
            Release::Forward(queued) => {
                // Fired early; re-arm and keep waiting for the link.
                self.arm_deadline(&queued, now_ms);
                if let Some(queue) = self.queues.get_mut(&next_hop) {
                    queue.insert(pos, queued);
                }
            }
        }
        if self.queues.get(&next_hop).is_some_and(VecDeque::is_empty) {
            self.queues.remove(&next_hop);
        }
    }

    fn cancel_deadline(&mut self, packet: PacketId) {
        if let Some(timer) = self.delay.cancel_deadline(packet) {
            self.scheduler.cancel(timer);
        }
    }

    fn record_expired(&mut self, exceeded: DelayExceeded) {
        if let Some(link) = self.links.get_mut(&exceeded.link) {
            link.stats_mut().record_expired();
        }
        self.events.push(KeyEvent::PacketExpired(exceeded));
    }

    fn no_secured_route(&mut self, packet: Packet) -> SendOutcome {
        warn!(
            packet = %packet.id,
            destination = %packet.destination,
            "No secured route"
        );
        self.events.push(KeyEvent::NoSecuredRoute {
            destination: packet.destination,
            packet: packet.id,
        });
        SendOutcome::NoSecuredRoute(packet)
    }
}
