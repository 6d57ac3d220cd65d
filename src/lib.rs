//! qkdnet: key material management for QKD-secured networks
//!
//! Per-link key buffers filled by quantum key distribution and drained by
//! encrypted traffic, the charging sessions that refill them, key-aware
//! route selection, and delay bounds for secured packets. Everything runs
//! on simulated time supplied by the caller.

pub mod accounting;
pub mod buffer;
pub mod charging;
pub mod config;
pub mod delay;
pub mod events;
pub mod link;
pub mod node;
pub mod routing;
pub mod sim;
pub mod transport;

// Re-export buffer types
pub use buffer::{BufferError, BufferLevel, Credited, KeyBuffer, LevelChange};

// Re-export config types
pub use config::{
    ChargingConfig, Config, ConfigError, CostConfig, DelayConfig, KeyBufferConfig, LinkConfig,
    NodeConfig, RoutingConfig,
};

// Re-export link types
pub use link::{LinkError, LinkKey, LinkRegistry, LinkStats, NodeId, SecuredLink};

// Re-export charging types
pub use charging::{
    ChargingController, ChargingError, ChargingSession, ChargingState, ChargingStatus, SessionId,
};

// Re-export accounting types
pub use accounting::{
    AuthMode, ConsumptionAccountant, DelayTag, EncryptionMode, KeyCostModel, Packet, PacketId,
    Prepared, Rejected, SecuredPacket, TrafficClass,
};

// Re-export routing types
pub use routing::{
    DistanceVector, KeyAwareRouting, KeyGrade, OnDemand, ProtocolRegistry, ProtocolRole,
    RankedRoute, RouteCandidate, RouteId, RouteKeyAnnotation, RouteRequest, RoutingError,
    RoutingProtocol, SecuredSelection,
};

// Re-export delay types
pub use delay::{DelayBoundEnforcer, DelayExceeded, Release};

// Re-export event, scheduler and transport types
pub use events::KeyEvent;
pub use sim::{EventId, EventQueue, Scheduler};
pub use transport::{NullTransport, Transport, TransportError};

// Re-export node types
pub use node::{Node, NodeError, NodeState, SendOutcome, TimerEvent};
