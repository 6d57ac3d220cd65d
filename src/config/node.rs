//! Node configuration subsections.
//!
//! Identity and tick period (`node.*`), charging (`charging.*`), key cost
//! model (`cost.*`), key-aware routing (`routing.*`) and delay bounds
//! (`delay.*`).

use serde::{Deserialize, Serialize};

use crate::accounting::{AuthMode, EncryptionMode};
use crate::link::NodeId;
use crate::routing::ProtocolRole;

// ============================================================================
// Node
// ============================================================================

/// Node configuration (`node.*`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// This node's ID (`node.id`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<NodeId>,

    /// Maintenance tick period in ms (`node.tick_interval_ms`).
    ///
    /// The tick is the only retry for a buffer left below its threshold by
    /// an abandoned or `charging.total_amount`-capped session. With 0 the
    /// node schedules no ticks and the embedder must call `Node::tick`.
    #[serde(default = "NodeConfig::default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: None,
            tick_interval_ms: 1_000,
        }
    }
}

impl NodeConfig {
    fn default_tick_interval_ms() -> u64 { 1_000 }

    /// Merge `node.*` from a later file.
    pub fn merge(&mut self, other: NodeConfig) {
        if other.id.is_some() {
            self.id = other.id;
        }
        merge_fields!(self, other, [tick_interval_ms]);
    }
}

// ============================================================================
// Charging
// ============================================================================

/// Charging application (`charging.*`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargingConfig {
    /// Bytes requested per charging round (`charging.send_size`).
    #[serde(default = "ChargingConfig::default_send_size")]
    pub send_size: u64,
    /// Gap between charging rounds in ms (`charging.round_interval_ms`).
    #[serde(default = "ChargingConfig::default_round_interval_ms")]
    pub round_interval_ms: u64,
    /// Cap on bytes delivered per session, 0 = until full (`charging.total_amount`).
    #[serde(default)]
    pub total_amount: u64,
}

impl Default for ChargingConfig {
    fn default() -> Self {
        Self {
            send_size: 524_288,
            round_interval_ms: 100,
            total_amount: 0,
        }
    }
}

impl ChargingConfig {
    fn default_send_size() -> u64 { 524_288 }
    fn default_round_interval_ms() -> u64 { 100 }

    /// Merge `charging.*` from a later file.
    pub fn merge(&mut self, other: ChargingConfig) {
        merge_fields!(self, other, [send_size, round_interval_ms, total_amount]);
    }
}

// ============================================================================
// Key Cost
// ============================================================================

/// Key cost model (`cost.*`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostConfig {
    /// Cipher applied to secured packets (`cost.encryption`).
    #[serde(default)]
    pub encryption: EncryptionMode,
    /// Authenticator applied to secured packets (`cost.authentication`).
    #[serde(default)]
    pub authentication: AuthMode,
    /// Key bytes per payload byte under one-time pad (`cost.otp_bytes_per_byte`).
    #[serde(default = "CostConfig::default_otp_bytes_per_byte")]
    pub otp_bytes_per_byte: u64,
    /// Key bytes per packet under AES-256 (`cost.aes_key_bytes`).
    #[serde(default = "CostConfig::default_aes_key_bytes")]
    pub aes_key_bytes: u64,
    /// Key bytes per authentication tag (`cost.auth_tag_bytes`).
    #[serde(default = "CostConfig::default_auth_tag_bytes")]
    pub auth_tag_bytes: u64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            encryption: EncryptionMode::default(),
            authentication: AuthMode::default(),
            otp_bytes_per_byte: 1,
            aes_key_bytes: 32,
            auth_tag_bytes: 32,
        }
    }
}

impl CostConfig {
    fn default_otp_bytes_per_byte() -> u64 { 1 }
    fn default_aes_key_bytes() -> u64 { 32 }
    fn default_auth_tag_bytes() -> u64 { 32 }

    /// Merge `cost.*` from a later file.
    pub fn merge(&mut self, other: CostConfig) {
        merge_fields!(
            self,
            other,
            [encryption, authentication, otp_bytes_per_byte, aes_key_bytes, auth_tag_bytes]
        );
    }
}

// ============================================================================
// Routing
// ============================================================================

/// Key-aware routing (`routing.*`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Base protocol consulted for candidates (`routing.protocol`).
    #[serde(default)]
    pub protocol: ProtocolRole,
    /// Key bytes a next-hop buffer needs to be viable for secured traffic
    /// (`routing.secured_min_bytes`).
    #[serde(default = "RoutingConfig::default_secured_min_bytes")]
    pub secured_min_bytes: u64,
    /// Same, for best-effort traffic (`routing.best_effort_min_bytes`).
    #[serde(default)]
    pub best_effort_min_bytes: u64,
    /// Annotation lifetime in ms; 0 disables epochs (`routing.epoch_ms`).
    #[serde(default = "RoutingConfig::default_epoch_ms")]
    pub epoch_ms: u64,
    /// Run seed for protocol random streams (`routing.seed`).
    #[serde(default = "RoutingConfig::default_seed")]
    pub seed: u64,
    /// First stream index handed to installed protocols (`routing.first_stream`).
    #[serde(default)]
    pub first_stream: u64,
    /// Reactive route lifetime in ms (`routing.route_lifetime_ms`).
    #[serde(default = "RoutingConfig::default_route_lifetime_ms")]
    pub route_lifetime_ms: u64,
    /// Upper bound on route request jitter in ms (`routing.max_request_jitter_ms`).
    #[serde(default = "RoutingConfig::default_max_request_jitter_ms")]
    pub max_request_jitter_ms: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            protocol: ProtocolRole::default(),
            secured_min_bytes: 2_048,
            best_effort_min_bytes: 0,
            epoch_ms: 15_000,
            seed: 1,
            first_stream: 0,
            route_lifetime_ms: 3_000,
            max_request_jitter_ms: 10,
        }
    }
}

impl RoutingConfig {
    fn default_secured_min_bytes() -> u64 { 2_048 }
    fn default_epoch_ms() -> u64 { 15_000 }
    fn default_seed() -> u64 { 1 }
    fn default_route_lifetime_ms() -> u64 { 3_000 }
    fn default_max_request_jitter_ms() -> u64 { 10 }

    /// Merge `routing.*` from a later file.
    pub fn merge(&mut self, other: RoutingConfig) {
        merge_fields!(
            self,
            other,
            [
                protocol,
                secured_min_bytes,
                best_effort_min_bytes,
                epoch_ms,
                seed,
                first_stream,
                route_lifetime_ms,
                max_request_jitter_ms,
            ]
        );
    }
}

// ============================================================================
// Delay
// ============================================================================

/// Delay bounds (`delay.*`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayConfig {
    /// Bound applied when the sender gives none, 0 = unbounded
    /// (`delay.default_max_delay_ms`).
    #[serde(default)]
    pub default_max_delay_ms: u64,
}

impl DelayConfig {
    /// Merge `delay.*` from a later file.
    pub fn merge(&mut self, other: DelayConfig) {
        merge_fields!(self, other, [default_max_delay_ms]);
    }
}
