//! qkdnet Node Entity
//!
//! Top-level structure for one simulated node. The node owns its secured
//! links (and through them the key buffers), the charging controller, the
//! consumption accountant, the installed routing protocol with its
//! key-aware extension, and the delay-bound enforcer. It drives them from
//! three kinds of input:
//!
//! - calls from the embedder (`send_secured`, `send_best_effort`,
//!   `on_link_ready`, `tick`)
//! - notifications from the charging transport (`on_charge_delivered`,
//!   `on_charge_failed`)
//! - timers it scheduled itself (`on_timer`)
//!
//! Every handler runs to completion; nothing blocks. Observable outcomes
//! are queued as [`KeyEvent`]s and read with [`Node::drain_events`].

mod charging;
mod lifecycle;
mod send;
#[cfg(test)]
mod tests;

pub use send::SendOutcome;

use std::collections::{HashMap, VecDeque};
use std::fmt;
use thiserror::Error;
use tracing::debug;

use crate::accounting::{ConsumptionAccountant, KeyCostModel, PacketId, SecuredPacket};
use crate::buffer::{BufferError, KeyBuffer, LevelChange};
use crate::charging::{ChargingController, ChargingError};
use crate::config::{Config, ConfigError};
use crate::delay::DelayBoundEnforcer;
use crate::events::KeyEvent;
use crate::link::{LinkError, LinkKey, LinkRegistry, LinkStats, NodeId};
use crate::routing::{
    DistanceVector, KeyAwareRouting, OnDemand, ProtocolRegistry, ProtocolRole, RoutingError,
};
use crate::sim::{EventId, Scheduler};
use crate::transport::{Transport, TransportError};

/// Errors related to node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("node already started")]
    AlreadyStarted,

    #[error("node not running ({0})")]
    NotRunning(NodeState),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("link error: {0}")]
    Link(#[from] LinkError),

    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("charging error: {0}")]
    Charging(#[from] ChargingError),

    #[error("routing error: {0}")]
    Routing(#[from] RoutingError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Node operational state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    /// Created but links not brought up.
    Created,
    /// Links up, handling traffic.
    Running,
    /// Shut down; all links torn down.
    Stopped,
}

impl NodeState {
    /// Check if node is operational.
    pub fn is_operational(&self) -> bool {
        matches!(self, NodeState::Running)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::Created => "created",
            NodeState::Running => "running",
            NodeState::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

/// Timers a node schedules on its scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerEvent {
    /// Request the next charging round for a link.
    ChargingRound(LinkKey),
    /// A queued packet reaches its delay bound.
    DelayDeadline { link: LinkKey, packet: PacketId },
    /// Periodic maintenance.
    Tick,
}

/// A qkdnet node.
pub struct Node<S, T> {
    // === Identity ===
    id: NodeId,

    // === Configuration ===
    config: Config,

    // === State ===
    state: NodeState,

    // === External boundaries ===
    scheduler: S,
    transport: T,

    // === Key material ===
    /// Secured links and their buffers.
    links: LinkRegistry,
    /// Replenishment sessions.
    charging: ChargingController,
    /// Debits for outgoing secured packets.
    accountant: ConsumptionAccountant,

    // === Routing ===
    protocols: ProtocolRegistry,
    role: ProtocolRole,
    routing: KeyAwareRouting,

    // === Delivery ===
    delay: DelayBoundEnforcer,
    /// Secured packets waiting for a busy next hop, oldest first.
    queues: HashMap<NodeId, VecDeque<SecuredPacket>>,

    // === Timers & events ===
    tick_timer: Option<EventId>,
    events: Vec<KeyEvent>,
}

impl<S, T> Node<S, T>
where
    S: Scheduler<TimerEvent>,
    T: Transport,
{
    /// Create a node from configuration.
    ///
    /// Installs the configured routing protocol, gives it its random
    /// streams and attaches key awareness. Links are brought up by
    /// [`Node::start`].
    pub fn new(config: Config, scheduler: S, transport: T) -> Result<Self, NodeError> {
        let id = config.node_id()?;
        config.validate_links()?;

        let role = config.routing.protocol;
        let mut protocols = ProtocolRegistry::new();
        match role {
            ProtocolRole::Proactive => protocols.install_proactive(DistanceVector::new(
                id,
                config.routing.max_request_jitter_ms,
            ))?,
            ProtocolRole::Reactive => {
                protocols.install_reactive(OnDemand::new(id, &config.routing))?
            }
        }
        protocols.assign_streams(config.routing.seed, config.routing.first_stream);
        let routing = KeyAwareRouting::attach(id, &config.routing);

        debug!(node = %id, role = %role, "Node created");

        Ok(Self {
            id,
            state: NodeState::Created,
            scheduler,
            transport,
            links: LinkRegistry::new(),
            charging: ChargingController::new(&config.charging),
            accountant: ConsumptionAccountant::new(KeyCostModel::new(&config.cost)),
            protocols,
            role,
            routing,
            delay: DelayBoundEnforcer::new(&config.delay),
            queues: HashMap::new(),
            tick_timer: None,
            events: Vec::new(),
            config,
        })
    }

    // === Accessors ===

    /// This node's ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Current operational state.
    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Secured links.
    pub fn links(&self) -> &LinkRegistry {
        &self.links
    }

    /// Key buffer of the link to `peer`.
    pub fn buffer(&self, peer: NodeId) -> Option<&KeyBuffer> {
        self.links.buffer(&self.link_key(peer))
    }

    /// Statistics of the link to `peer`.
    pub fn link_stats(&self, peer: NodeId) -> Option<&LinkStats> {
        self.links.stats(&self.link_key(peer))
    }

    /// Charging controller.
    pub fn charging(&self) -> &ChargingController {
        &self.charging
    }

    /// Key-aware routing extension.
    pub fn routing(&self) -> &KeyAwareRouting {
        &self.routing
    }

    /// Installed routing protocols.
    pub fn protocols_mut(&mut self) -> &mut ProtocolRegistry {
        &mut self.protocols
    }

    /// Delay-bound enforcer.
    pub fn delay(&self) -> &DelayBoundEnforcer {
        &self.delay
    }

    /// Number of packets queued toward `next_hop`.
    pub fn queued(&self, next_hop: NodeId) -> usize {
        self.queues.get(&next_hop).map_or(0, VecDeque::len)
    }

    /// The scheduler.
    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// The scheduler, mutably (to pop due timers).
    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The transport, mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Take every event recorded since the last drain, oldest first.
    pub fn drain_events(&mut self) -> Vec<KeyEvent> {
        std::mem::take(&mut self.events)
    }

    // === Routing input ===

    /// Feed a distance-vector advertisement to the proactive protocol.
    pub fn on_advertisement(
        &mut self,
        from: NodeId,
        destination: NodeId,
        hops: u8,
        seq: u32,
        now_ms: u64,
    ) -> Result<bool, NodeError> {
        let dv = self
            .protocols
            .distance_vector_mut()
            .ok_or(RoutingError::RoleNotInstalled(ProtocolRole::Proactive))?;
        Ok(dv.on_advertisement(from, destination, hops, seq, now_ms))
    }

    /// Feed a route reply to the reactive protocol.
    pub fn on_route_reply(
        &mut self,
        next_hop: NodeId,
        destination: NodeId,
        hops: u8,
        seq: u32,
        now_ms: u64,
    ) -> Result<bool, NodeError> {
        let od = self
            .protocols
            .on_demand_mut()
            .ok_or(RoutingError::RoleNotInstalled(ProtocolRole::Reactive))?;
        Ok(od.on_route_reply(next_hop, destination, hops, seq, now_ms))
    }

    // === Timers ===

    /// Handle a timer this node scheduled.
    pub fn on_timer(&mut self, event: TimerEvent, now_ms: u64) {
        match event {
            TimerEvent::ChargingRound(link) => self.run_charging_round(link, now_ms),
            TimerEvent::DelayDeadline { link, packet } => {
                self.expire_queued(link, packet, now_ms)
            }
            TimerEvent::Tick => {
                self.tick_timer = None;
                if self.state.is_operational() {
                    self.tick(now_ms);
                    self.schedule_tick(now_ms);
                }
            }
        }
    }

    // === Internal helpers ===

    fn link_key(&self, peer: NodeId) -> LinkKey {
        LinkKey::new(self.id, peer)
    }

    fn require_running(&self) -> Result<(), NodeError> {
        if self.state.is_operational() {
            Ok(())
        } else {
            Err(NodeError::NotRunning(self.state))
        }
    }

    /// Record a threshold crossing and react to it.
    ///
    /// The event is recorded before any charging session it triggers.
    fn on_level_change(&mut self, change: LevelChange, now_ms: u64) {
        self.events.push(KeyEvent::LevelChanged(change));
        self.routing.on_level_change(&change);
        if change.is_drop() {
            self.maybe_start_charging(change.link, now_ms);
        }
    }

    fn schedule_tick(&mut self, now_ms: u64) {
        let interval = self.config.node.tick_interval_ms;
        if interval > 0 && self.tick_timer.is_none() {
            let at = now_ms.saturating_add(interval);
            self.tick_timer = Some(self.scheduler.schedule_at(at, TimerEvent::Tick));
        }
    }
}
