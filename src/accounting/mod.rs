//! Key Consumption Accounting
//!
//! Prices a packet in key bytes and debits the chosen link's buffer in the
//! same call. A packet either leaves here as a [`SecuredPacket`] with its
//! cost already paid, or comes back to the caller untouched together with
//! the reason. The accountant never retries and never picks another link;
//! that decision belongs to whoever called it.

mod packet;

use thiserror::Error;
use tracing::{debug, warn};

use crate::buffer::{BufferError, LevelChange};
use crate::config::CostConfig;
use crate::link::{NodeId, SecuredLink};

pub use packet::{
    AuthMode, DelayTag, EncryptionMode, Packet, PacketId, SecuredPacket, TrafficClass,
};

/// Deterministic key price of a packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyCostModel {
    encryption: EncryptionMode,
    authentication: AuthMode,
    otp_bytes_per_byte: u64,
    aes_key_bytes: u64,
    auth_tag_bytes: u64,
}

impl KeyCostModel {
    /// Build the model from `cost.*`.
    pub fn new(config: &CostConfig) -> Self {
        Self {
            encryption: config.encryption,
            authentication: config.authentication,
            otp_bytes_per_byte: config.otp_bytes_per_byte,
            aes_key_bytes: config.aes_key_bytes,
            auth_tag_bytes: config.auth_tag_bytes,
        }
    }

    /// Cipher applied to secured packets.
    pub fn encryption(&self) -> EncryptionMode {
        self.encryption
    }

    /// Authenticator applied to secured packets.
    pub fn authentication(&self) -> AuthMode {
        self.authentication
    }

    /// Key bytes needed to secure `payload_size` bytes.
    ///
    /// One-time pad costs per payload byte, AES a fixed key per packet,
    /// and the authentication tag a fixed amount on top.
    pub fn cost(&self, payload_size: u32) -> u64 {
        let cipher = match self.encryption {
            EncryptionMode::None => 0,
            EncryptionMode::OneTimePad => {
                u64::from(payload_size).saturating_mul(self.otp_bytes_per_byte)
            }
            EncryptionMode::Aes256 => self.aes_key_bytes,
        };
        let tag = match self.authentication {
            AuthMode::None => 0,
            AuthMode::Vmac => self.auth_tag_bytes,
        };
        cipher.saturating_add(tag)
    }
}

impl Default for KeyCostModel {
    fn default() -> Self {
        Self::new(&CostConfig::default())
    }
}

/// A packet accepted for sending.
#[derive(Clone, Debug)]
pub struct Prepared {
    /// The secured packet, cost already debited.
    pub packet: SecuredPacket,
    /// Threshold crossing caused by the debit, if any.
    pub level_change: Option<LevelChange>,
}

/// A packet the link could not afford, handed back to the caller.
#[derive(Debug, Error)]
#[error("packet {} refused on link toward {next_hop}: {error}", .packet.id)]
pub struct Rejected {
    /// The untouched plaintext packet.
    pub packet: Packet,
    /// The neighbor that was tried.
    pub next_hop: NodeId,
    /// Why the debit failed.
    pub error: BufferError,
}

/// Debits key buffers for outgoing secured packets.
#[derive(Clone, Debug, Default)]
pub struct ConsumptionAccountant {
    model: KeyCostModel,
}

impl ConsumptionAccountant {
    /// Create an accountant with the given cost model.
    pub fn new(model: KeyCostModel) -> Self {
        Self { model }
    }

    /// The cost model in use.
    pub fn model(&self) -> &KeyCostModel {
        &self.model
    }

    /// Price `packet` and debit `link` for it.
    ///
    /// Pricing and debit happen in one call with no suspension point, so
    /// no other consumer can see the buffer between the check and the
    /// decrement. On success the packet carries the configured modes; on
    /// failure it is returned unchanged and the buffer is untouched.
    pub fn prepare_for_send(
        &self,
        packet: Packet,
        next_hop: NodeId,
        link: &mut SecuredLink,
    ) -> Result<Prepared, Rejected> {
        let key = link.key();
        let cost = self.model.cost(packet.payload_size);
        let (buffer, stats) = link.parts_mut();

        match buffer.try_debit(cost) {
            Ok(level_change) => {
                stats.record_secured(packet.payload_size, cost);
                debug!(
                    packet = %packet.id,
                    link = %key,
                    cost,
                    current = buffer.current(),
                    "Key debited for packet"
                );
                let packet = SecuredPacket::new(
                    packet,
                    key,
                    next_hop,
                    self.model.encryption,
                    self.model.authentication,
                    cost,
                );
                Ok(Prepared {
                    packet,
                    level_change,
                })
            }
            Err(error) => {
                stats.record_rejected();
                warn!(
                    packet = %packet.id,
                    link = %key,
                    cost,
                    available = buffer.available(),
                    "Insufficient key material for packet"
                );
                Err(Rejected {
                    packet,
                    next_hop,
                    error,
                })
            }
        }
    }
}
