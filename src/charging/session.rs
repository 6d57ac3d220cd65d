//! A single in-progress replenishment transfer.

use std::fmt;

use crate::link::LinkKey;
use crate::sim::EventId;

/// Identifier of a charging session, unique per controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl SessionId {
    /// Create from a raw value.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "charge:{}", self.0)
    }
}

/// Replenishment of one buffer, from trigger to completion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChargingSession {
    id: SessionId,
    link: LinkKey,
    /// Bytes this session intends to deliver.
    target_bytes: u64,
    /// Bytes reported delivered by the charging transport.
    delivered_bytes: u64,
    /// Bytes of those that fit into the buffer.
    applied_bytes: u64,
    started_at_ms: u64,
    /// Next scheduled round, if one is pending.
    follow_up: Option<EventId>,
}

impl ChargingSession {
    pub(crate) fn new(id: SessionId, link: LinkKey, target_bytes: u64, started_at_ms: u64) -> Self {
        Self {
            id,
            link,
            target_bytes,
            delivered_bytes: 0,
            applied_bytes: 0,
            started_at_ms,
            follow_up: None,
        }
    }

    /// Session ID.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Link being charged.
    pub fn link(&self) -> LinkKey {
        self.link
    }

    /// Bytes this session intends to deliver.
    pub fn target_bytes(&self) -> u64 {
        self.target_bytes
    }

    /// Bytes delivered so far.
    pub fn delivered_bytes(&self) -> u64 {
        self.delivered_bytes
    }

    /// Bytes credited to the buffer so far.
    pub fn applied_bytes(&self) -> u64 {
        self.applied_bytes
    }

    /// When the session opened (simulated ms).
    pub fn started_at_ms(&self) -> u64 {
        self.started_at_ms
    }

    /// Time since the session opened.
    pub fn age(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.started_at_ms)
    }

    /// Bytes still to deliver.
    pub fn remaining(&self) -> u64 {
        self.target_bytes.saturating_sub(self.delivered_bytes)
    }

    /// Size of the next round given the charging application's send size.
    pub fn round_size(&self, send_size: u64) -> u64 {
        self.remaining().min(send_size)
    }

    /// Pending follow-up timer.
    pub fn follow_up(&self) -> Option<EventId> {
        self.follow_up
    }

    pub(crate) fn record_delivery(&mut self, delivered: u64, applied: u64) {
        self.delivered_bytes = self.delivered_bytes.saturating_add(delivered);
        self.applied_bytes = self.applied_bytes.saturating_add(applied);
    }

    pub(crate) fn set_follow_up(&mut self, id: EventId) -> Option<EventId> {
        self.follow_up.replace(id)
    }

    pub(crate) fn take_follow_up(&mut self) -> Option<EventId> {
        self.follow_up.take()
    }
}
