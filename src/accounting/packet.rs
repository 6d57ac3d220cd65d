//! Plaintext and secured packets.
//!
//! A [`SecuredPacket`] can only be built by the accountant after the key
//! cost has been debited, so holding one is proof the key was paid for.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::link::{LinkKey, NodeId};

/// Identifier assigned to each packet by the sender.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PacketId(u64);

impl PacketId {
    /// Create from a raw value.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pkt:{}", self.0)
    }
}

/// Cipher applied to a secured payload.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionMode {
    /// No encryption.
    None,
    /// One key byte per payload byte.
    #[default]
    OneTimePad,
    /// Fixed-size key per packet.
    Aes256,
}

impl fmt::Display for EncryptionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncryptionMode::None => write!(f, "none"),
            EncryptionMode::OneTimePad => write!(f, "otp"),
            EncryptionMode::Aes256 => write!(f, "aes256"),
        }
    }
}

/// Authenticator applied to a secured payload.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// No authentication tag.
    None,
    /// Wegman-Carter style MAC, fixed key per tag.
    #[default]
    Vmac,
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMode::None => write!(f, "none"),
            AuthMode::Vmac => write!(f, "vmac"),
        }
    }
}

/// Traffic class, used to pick the per-route key minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrafficClass {
    /// Must be encrypted; never sent in the clear.
    Secured,
    /// May use a route with no key available.
    BestEffort,
}

impl fmt::Display for TrafficClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrafficClass::Secured => write!(f, "secured"),
            TrafficClass::BestEffort => write!(f, "best-effort"),
        }
    }
}

/// A plaintext unit emitted by an application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    /// Sender-assigned ID.
    pub id: PacketId,
    /// Final destination.
    pub destination: NodeId,
    /// Payload size in bytes.
    pub payload_size: u32,
}

impl Packet {
    /// Create a packet.
    pub fn new(id: PacketId, destination: NodeId, payload_size: u32) -> Self {
        Self {
            id,
            destination,
            payload_size,
        }
    }
}

/// Delay budget attached by the enforcer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DelayTag {
    /// Maximum age in ms; 0 = unbounded.
    pub max_delay_ms: u64,
    /// When the budget started (simulated ms).
    pub created_at_ms: u64,
}

impl DelayTag {
    /// Check whether `now_ms` is past the budget.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.max_delay_ms > 0 && self.age(now_ms) > self.max_delay_ms
    }

    /// Time since the budget started.
    pub fn age(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.created_at_ms)
    }

    /// Absolute deadline, if bounded.
    pub fn deadline_ms(&self) -> Option<u64> {
        (self.max_delay_ms > 0).then(|| self.created_at_ms.saturating_add(self.max_delay_ms))
    }
}

/// A packet whose key cost has been debited from `link`'s buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecuredPacket {
    packet: Packet,
    link: LinkKey,
    next_hop: NodeId,
    encryption: EncryptionMode,
    authentication: AuthMode,
    key_cost: u64,
    delay: Option<DelayTag>,
}

impl SecuredPacket {
    pub(crate) fn new(
        packet: Packet,
        link: LinkKey,
        next_hop: NodeId,
        encryption: EncryptionMode,
        authentication: AuthMode,
        key_cost: u64,
    ) -> Self {
        Self {
            packet,
            link,
            next_hop,
            encryption,
            authentication,
            key_cost,
            delay: None,
        }
    }

    /// Packet ID.
    pub fn id(&self) -> PacketId {
        self.packet.id
    }

    /// Final destination.
    pub fn destination(&self) -> NodeId {
        self.packet.destination
    }

    /// Payload size in bytes.
    pub fn payload_size(&self) -> u32 {
        self.packet.payload_size
    }

    /// Link whose buffer paid for this packet.
    pub fn link(&self) -> LinkKey {
        self.link
    }

    /// Neighbor the packet leaves through.
    pub fn next_hop(&self) -> NodeId {
        self.next_hop
    }

    /// Cipher tag.
    pub fn encryption(&self) -> EncryptionMode {
        self.encryption
    }

    /// Authenticator tag.
    pub fn authentication(&self) -> AuthMode {
        self.authentication
    }

    /// Key bytes already debited for this packet.
    pub fn key_cost(&self) -> u64 {
        self.key_cost
    }

    /// Delay budget, once tagged.
    pub fn delay(&self) -> Option<DelayTag> {
        self.delay
    }

    pub(crate) fn set_delay(&mut self, tag: DelayTag) {
        self.delay = Some(tag);
    }

    /// The underlying plaintext description.
    pub fn packet(&self) -> &Packet {
        &self.packet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_tag_unbounded() {
        let tag = DelayTag {
            max_delay_ms: 0,
            created_at_ms: 100,
        };
        assert!(!tag.is_expired(u64::MAX));
        assert_eq!(tag.deadline_ms(), None);
    }

    #[test]
    fn test_delay_tag_boundary() {
        let tag = DelayTag {
            max_delay_ms: 5,
            created_at_ms: 100,
        };
        assert!(!tag.is_expired(104));
        assert!(!tag.is_expired(105));
        assert!(tag.is_expired(106));
        assert_eq!(tag.deadline_ms(), Some(105));
        assert_eq!(tag.age(103), 3);
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(format!("{}", EncryptionMode::OneTimePad), "otp");
        assert_eq!(format!("{}", AuthMode::Vmac), "vmac");
        assert_eq!(format!("{}", TrafficClass::BestEffort), "best-effort");
        assert_eq!(format!("{}", PacketId::new(12)), "pkt:12");
    }

    #[test]
    fn test_mode_serde_names() {
        let mode: EncryptionMode = serde_yaml::from_str("one_time_pad").unwrap();
        assert_eq!(mode, EncryptionMode::OneTimePad);
        let auth: AuthMode = serde_yaml::from_str("vmac").unwrap();
        assert_eq!(auth, AuthMode::Vmac);
    }
}
