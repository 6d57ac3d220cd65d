//! Key Lifecycle Events
//!
//! Everything observable about key buffers, charging and secured delivery
//! is reported as a [`KeyEvent`]. The node appends events in the order
//! they happen and hands them out through `Node::drain_events`; there are
//! no global counters or listener callbacks.

use std::fmt;

use crate::accounting::PacketId;
use crate::buffer::LevelChange;
use crate::charging::SessionId;
use crate::delay::DelayExceeded;
use crate::link::{LinkKey, NodeId};

/// An observable key lifecycle event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyEvent {
    /// A buffer crossed its charging threshold.
    LevelChanged(LevelChange),

    /// A charging session opened.
    ChargingStarted {
        link: LinkKey,
        session: SessionId,
        target_bytes: u64,
    },

    /// A charging round was credited and more rounds follow.
    ChargingProgress {
        link: LinkKey,
        session: SessionId,
        applied: u64,
        current: u64,
    },

    /// A charging session finished.
    ChargingCompleted {
        link: LinkKey,
        session: SessionId,
        delivered: u64,
        applied: u64,
    },

    /// A charging session was abandoned after a transport failure.
    ChargingAbandoned {
        link: LinkKey,
        session: SessionId,
        delivered: u64,
        reason: String,
    },

    /// A secured packet outlived its delay bound. Its key is not refunded.
    PacketExpired(DelayExceeded),

    /// No route to the destination can carry secured traffic.
    NoSecuredRoute { destination: NodeId, packet: PacketId },
}

impl KeyEvent {
    /// Link the event concerns, if any.
    pub fn link(&self) -> Option<LinkKey> {
        match self {
            KeyEvent::LevelChanged(change) => Some(change.link),
            KeyEvent::ChargingStarted { link, .. }
            | KeyEvent::ChargingProgress { link, .. }
            | KeyEvent::ChargingCompleted { link, .. }
            | KeyEvent::ChargingAbandoned { link, .. } => Some(*link),
            KeyEvent::PacketExpired(exceeded) => Some(exceeded.link),
            KeyEvent::NoSecuredRoute { .. } => None,
        }
    }

    /// Short event name.
    pub fn kind(&self) -> &'static str {
        match self {
            KeyEvent::LevelChanged(_) => "level_changed",
            KeyEvent::ChargingStarted { .. } => "charging_started",
            KeyEvent::ChargingProgress { .. } => "charging_progress",
            KeyEvent::ChargingCompleted { .. } => "charging_completed",
            KeyEvent::ChargingAbandoned { .. } => "charging_abandoned",
            KeyEvent::PacketExpired(_) => "packet_expired",
            KeyEvent::NoSecuredRoute { .. } => "no_secured_route",
        }
    }
}

impl fmt::Display for KeyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyEvent::LevelChanged(change) => {
                write!(f, "{} {} ({} bytes)", change.link, change.level, change.current)
            }
            KeyEvent::ChargingStarted {
                link,
                session,
                target_bytes,
            } => write!(f, "{} {} started, target {} bytes", link, session, target_bytes),
            KeyEvent::ChargingProgress {
                link,
                session,
                applied,
                current,
            } => write!(f, "{} {} +{} bytes, now {}", link, session, applied, current),
            KeyEvent::ChargingCompleted {
                link,
                session,
                delivered,
                ..
            } => write!(f, "{} {} completed after {} bytes", link, session, delivered),
            KeyEvent::ChargingAbandoned {
                link,
                session,
                reason,
                ..
            } => write!(f, "{} {} abandoned: {}", link, session, reason),
            KeyEvent::PacketExpired(exceeded) => write!(f, "{}", exceeded),
            KeyEvent::NoSecuredRoute {
                destination,
                packet,
            } => write!(f, "no secured route to {} for {}", destination, packet),
        }
    }
}
