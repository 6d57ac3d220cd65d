//! Delay Bound Enforcement
//!
//! Tags secured packets with a maximum age and drops them once they are
//! older than that when they reach the link. Key spent on a dropped packet
//! stays spent: the drop is reported but nothing is credited back.
//!
//! Packets waiting in a queue also get a deadline timer so they expire
//! even if the link never becomes ready. The enforcer only remembers the
//! timer handles; scheduling and cancelling them is up to the caller.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, warn};

use crate::accounting::{DelayTag, PacketId, SecuredPacket};
use crate::config::DelayConfig;
use crate::link::LinkKey;
use crate::sim::EventId;

/// Drop notification for a packet that outlived its budget.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("packet {packet} on link {link} exceeded its delay bound ({age_ms} ms > {max_delay_ms} ms)")]
pub struct DelayExceeded {
    pub packet: PacketId,
    pub link: LinkKey,
    /// Key bytes spent on the packet and not refunded.
    pub key_cost: u64,
    pub age_ms: u64,
    pub max_delay_ms: u64,
}

/// Outcome of a release check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Release {
    /// Within budget; hand to the transport.
    Forward(SecuredPacket),
    /// Past budget; dropped.
    Expired(DelayExceeded),
}

#[derive(Clone, Copy, Debug)]
struct Deadline {
    link: LinkKey,
    event: EventId,
}

/// Attaches delay budgets and enforces them at release time.
#[derive(Clone, Debug, Default)]
pub struct DelayBoundEnforcer {
    default_max_delay_ms: u64,
    deadlines: HashMap<PacketId, Deadline>,
}

impl DelayBoundEnforcer {
    /// Create an enforcer from `delay.*`.
    pub fn new(config: &DelayConfig) -> Self {
        Self {
            default_max_delay_ms: config.default_max_delay_ms,
            deadlines: HashMap::new(),
        }
    }

    /// Attach a delay budget starting at `now_ms`.
    ///
    /// `None` uses the configured default; a budget of 0 means unbounded.
    pub fn tag(&self, packet: &mut SecuredPacket, max_delay_ms: Option<u64>, now_ms: u64) {
        let max_delay_ms = max_delay_ms.unwrap_or(self.default_max_delay_ms);
        packet.set_delay(DelayTag {
            max_delay_ms,
            created_at_ms: now_ms,
        });
    }

    /// Decide whether `packet` may still go out at `now_ms`.
    ///
    /// Expired when the budget is non-zero and `now - created > budget`.
    /// Untagged packets are never expired.
    pub fn check_and_release(&self, packet: SecuredPacket, now_ms: u64) -> Release {
        let Some(tag) = packet.delay() else {
            return Release::Forward(packet);
        };

        if tag.is_expired(now_ms) {
            let exceeded = DelayExceeded {
                packet: packet.id(),
                link: packet.link(),
                key_cost: packet.key_cost(),
                age_ms: tag.age(now_ms),
                max_delay_ms: tag.max_delay_ms,
            };
            warn!(
                packet = %exceeded.packet,
                link = %exceeded.link,
                age_ms = exceeded.age_ms,
                max_delay_ms = exceeded.max_delay_ms,
                key_cost = exceeded.key_cost,
                "Packet dropped past its delay bound"
            );
            return Release::Expired(exceeded);
        }

        debug!(
            packet = %packet.id(),
            age_ms = tag.age(now_ms),
            "Packet released within delay bound"
        );
        Release::Forward(packet)
    }

    /// Remember the deadline timer of a queued packet.
    pub fn track_deadline(&mut self, packet: PacketId, link: LinkKey, event: EventId) {
        self.deadlines.insert(packet, Deadline { link, event });
    }

    /// Forget a packet's deadline, returning the timer to cancel.
    ///
    /// Idempotent: a second call returns `None`.
    pub fn cancel_deadline(&mut self, packet: PacketId) -> Option<EventId> {
        self.deadlines.remove(&packet).map(|d| d.event)
    }

    /// Forget every deadline on `link`, returning the timers to cancel.
    pub fn cancel_link(&mut self, link: &LinkKey) -> Vec<EventId> {
        let mut events = Vec::new();
        self.deadlines.retain(|_, d| {
            if d.link == *link {
                events.push(d.event);
                false
            } else {
                true
            }
        });
        events.sort();
        events
    }

    /// Number of tracked deadlines.
    pub fn pending_deadlines(&self) -> usize {
        self.deadlines.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounting::{AuthMode, EncryptionMode, Packet};
    use crate::link::NodeId;

    fn link() -> LinkKey {
        LinkKey::new(NodeId::new(1), NodeId::new(2))
    }

    fn secured(id: u64) -> SecuredPacket {
        SecuredPacket::new(
            Packet::new(PacketId::new(id), NodeId::new(2), 64),
            link(),
            NodeId::new(2),
            EncryptionMode::OneTimePad,
            AuthMode::Vmac,
            96,
        )
    }

    #[test]
    fn test_tag_uses_default() {
        let enforcer = DelayBoundEnforcer::new(&DelayConfig {
            default_max_delay_ms: 30,
        });
        let mut packet = secured(1);
        enforcer.tag(&mut packet, None, 100);
        assert_eq!(
            packet.delay(),
            Some(DelayTag {
                max_delay_ms: 30,
                created_at_ms: 100
            })
        );

        enforcer.tag(&mut packet, Some(5), 200);
        assert_eq!(packet.delay().unwrap().max_delay_ms, 5);
    }

    #[test]
    fn test_release_within_bound() {
        let enforcer = DelayBoundEnforcer::default();
        let mut packet = secured(1);
        enforcer.tag(&mut packet, Some(5), 1_000);

        assert!(matches!(
            enforcer.check_and_release(packet.clone(), 1_004),
            Release::Forward(_)
        ));
        assert!(matches!(
            enforcer.check_and_release(packet, 1_005),
            Release::Forward(_)
        ));
    }

    #[test]
    fn test_drop_past_bound() {
        let enforcer = DelayBoundEnforcer::default();
        let mut packet = secured(9);
        enforcer.tag(&mut packet, Some(5), 1_000);

        match enforcer.check_and_release(packet, 1_006) {
            Release::Expired(exceeded) => {
                assert_eq!(exceeded.packet, PacketId::new(9));
                assert_eq!(exceeded.age_ms, 6);
                assert_eq!(exceeded.max_delay_ms, 5);
                assert_eq!(exceeded.key_cost, 96);
            }
            other => panic!("expected expiry, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_bound_is_unbounded() {
        let enforcer = DelayBoundEnforcer::default();
        let mut packet = secured(1);
        enforcer.tag(&mut packet, Some(0), 0);
        assert!(matches!(
            enforcer.check_and_release(packet, u64::MAX),
            Release::Forward(_)
        ));
    }

    #[test]
    fn test_untagged_forwards() {
        let enforcer = DelayBoundEnforcer::default();
        assert!(matches!(
            enforcer.check_and_release(secured(1), 1_000_000),
            Release::Forward(_)
        ));
    }

    #[test]
    fn test_cancel_deadline_idempotent() {
        let mut enforcer = DelayBoundEnforcer::default();
        enforcer.track_deadline(PacketId::new(1), link(), EventId::new(10));

        assert_eq!(enforcer.cancel_deadline(PacketId::new(1)), Some(EventId::new(10)));
        assert_eq!(enforcer.cancel_deadline(PacketId::new(1)), None);
        assert_eq!(enforcer.pending_deadlines(), 0);
    }

    #[test]
    fn test_cancel_link() {
        let mut enforcer = DelayBoundEnforcer::default();
        let other = LinkKey::new(NodeId::new(1), NodeId::new(3));
        enforcer.track_deadline(PacketId::new(1), link(), EventId::new(2));
        enforcer.track_deadline(PacketId::new(2), other, EventId::new(3));
        enforcer.track_deadline(PacketId::new(3), link(), EventId::new(1));

        assert_eq!(
            enforcer.cancel_link(&link()),
            vec![EventId::new(1), EventId::new(2)]
        );
        assert!(enforcer.cancel_link(&link()).is_empty());
        assert_eq!(enforcer.pending_deadlines(), 1);
    }

    #[test]
    fn test_exceeded_display() {
        let exceeded = DelayExceeded {
            packet: PacketId::new(4),
            link: link(),
            key_cost: 10,
            age_ms: 7,
            max_delay_ms: 5,
        };
        assert!(format!("{}", exceeded).contains("7 ms > 5 ms"));
    }
}
