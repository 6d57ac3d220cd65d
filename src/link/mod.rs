//! Secured Links
//!
//! Identifiers for simulated nodes and the point-to-point links between
//! them, plus the per-link statistics the node keeps. Every secured link
//! owns exactly one key buffer; the [`LinkRegistry`] is the single owner
//! and everyone else looks buffers up by [`LinkKey`].

mod registry;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::buffer::BufferError;

pub use registry::{LinkRegistry, SecuredLink};

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier of a simulated node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u32);

impl NodeId {
    /// Create a node ID.
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node:{}", self.0)
    }
}

/// Identity of a link: the unordered pair of its endpoints.
///
/// The pair is normalized on construction so `LinkKey::new(a, b)` and
/// `LinkKey::new(b, a)` are equal and hash identically. One key buffer
/// serves both directions of the link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkKey {
    low: NodeId,
    high: NodeId,
}

impl LinkKey {
    /// Create a link key from two endpoints, in any order.
    pub fn new(a: NodeId, b: NodeId) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    /// Both endpoints, lower ID first.
    pub fn endpoints(&self) -> (NodeId, NodeId) {
        (self.low, self.high)
    }

    /// Check whether `node` is one of the endpoints.
    pub fn contains(&self, node: NodeId) -> bool {
        self.low == node || self.high == node
    }

    /// The endpoint opposite `node`, if `node` is on this link.
    pub fn other(&self, node: NodeId) -> Option<NodeId> {
        if self.low == node {
            Some(self.high)
        } else if self.high == node {
            Some(self.low)
        } else {
            None
        }
    }

    /// Check whether both endpoints are the same node.
    pub fn is_loop(&self) -> bool {
        self.low == self.high
    }
}

impl fmt::Display for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<->{}", self.low.0, self.high.0)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors related to secured link management.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("cannot secure a link from {0} to itself")]
    SelfLink(NodeId),

    #[error("link {0} already established")]
    AlreadyEstablished(LinkKey),

    #[error("link {0} not found")]
    NotFound(LinkKey),

    #[error("key buffer for link {link}: {source}")]
    Buffer {
        link: LinkKey,
        #[source]
        source: BufferError,
    },
}

// ============================================================================
// Link Statistics
// ============================================================================

/// Statistics for a secured link.
///
/// Counters only grow; they are read through explicit calls on the node
/// rather than shared globals.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Packets that left the node encrypted over this link.
    pub packets_secured: u64,
    /// Payload bytes of those packets.
    pub bytes_secured: u64,
    /// Key bytes debited from the buffer.
    pub key_bytes_consumed: u64,
    /// Packets refused for insufficient key material.
    pub packets_rejected: u64,
    /// Packets dropped by the delay bound after their key was spent.
    pub packets_expired: u64,
    /// Key bytes credited by charging.
    pub key_bytes_charged: u64,
    /// Charging sessions that ran to completion.
    pub sessions_completed: u64,
    /// Charging sessions abandoned on transport failure.
    pub sessions_abandoned: u64,
}

impl LinkStats {
    /// Create new link statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a packet secured with `key_cost` key bytes.
    pub fn record_secured(&mut self, payload_bytes: u32, key_cost: u64) {
        self.packets_secured += 1;
        self.bytes_secured += u64::from(payload_bytes);
        self.key_bytes_consumed += key_cost;
    }

    /// Record a packet refused for lack of key material.
    pub fn record_rejected(&mut self) {
        self.packets_rejected += 1;
    }

    /// Record a packet dropped past its delay bound.
    pub fn record_expired(&mut self) {
        self.packets_expired += 1;
    }

    /// Record key bytes credited by charging.
    pub fn record_charged(&mut self, bytes: u64) {
        self.key_bytes_charged += bytes;
    }

    /// Record the end of a charging session.
    pub fn record_session_end(&mut self, completed: bool) {
        if completed {
            self.sessions_completed += 1;
        } else {
            self.sessions_abandoned += 1;
        }
    }
}
