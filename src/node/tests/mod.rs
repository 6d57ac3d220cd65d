use super::*;
use crate::accounting::{Packet, PacketId};
use crate::config::{KeyBufferConfig, LinkConfig};
use crate::sim::EventQueue;
use crate::transport::mock::RecordingTransport;


pub(super) type TestNode = Node<EventQueue<TimerEvent>, RecordingTransport>;

pub(super) fn n(id: u32) -> NodeId {
    NodeId::new(id)
}

/// Buffer bounds small enough to exercise thresholds with a few packets.
pub(super) fn small_buffer(initial: u64) -> KeyBufferConfig {
    KeyBufferConfig::new(1_000, 10_000, 20_000, initial)
}

/// Config for node 1 with links to the given peers and manual ticks.
pub(super) fn make_config(links: &[(u32, KeyBufferConfig)]) -> Config {
    let mut config = Config::for_node(n(1));
    config.node.tick_interval_ms = 0;
    config.charging.send_size = 4_000;
    config.charging.round_interval_ms = 100;
    config.links = links
        .iter()
        .map(|(peer, bounds)| LinkConfig::new(n(*peer)).with_buffer(bounds.clone()))
        .collect();
    config
}

pub(super) fn make_node(config: Config) -> TestNode {
    let mut node = Node::new(config, EventQueue::new(), RecordingTransport::new()).unwrap();
    let failures = node.start(0).unwrap();
    assert!(failures.is_empty(), "link setup failed: {:?}", failures);
    node
}

/// Fire every timer due at or before `now_ms`, in order.
pub(super) fn run_until(node: &mut TestNode, now_ms: u64) -> usize {
    let mut fired = 0;
    while let Some((at, _, event)) = node.scheduler_mut().pop_due(now_ms) {
        node.on_timer(event, at);
        fired += 1;
    }
    fired
}

pub(super) fn packet(id: u64, destination: u32, payload_size: u32) -> Packet {
    Packet::new(PacketId::new(id), n(destination), payload_size)
}

pub(super) fn kinds(events: &[KeyEvent]) -> Vec<&'static str> {
    events.iter().map(KeyEvent::kind).collect()
}

// === Construction & lifecycle ===

#[test]
fn test_node_requires_id() {
    let result = Node::new(Config::new(), EventQueue::new(), RecordingTransport::new());
    assert!(matches!(
        result,
        Err(NodeError::Config(ConfigError::MissingNodeId))
    ));
}

#[test]
fn test_node_rejects_link_to_self() {
    let mut config = make_config(&[]);
    config.links.push(LinkConfig::new(n(1)));
    let result = Node::new(config, EventQueue::new(), RecordingTransport::new());
    assert!(matches!(
        result,
        Err(NodeError::Config(ConfigError::InvalidLink { .. }))
    ));
}

#[test]
fn test_start_brings_up_links() {
    let node = make_node(make_config(&[(2, small_buffer(15_000)), (3, small_buffer(15_000))]));
    assert_eq!(node.state(), NodeState::Running);
    assert_eq!(node.links().len(), 2);
    assert_eq!(node.buffer(n(2)).unwrap().current(), 15_000);
    assert_eq!(node.links().neighbors(n(1)), vec![n(2), n(3)]);
}

#[test]
fn test_start_twice_rejected() {
    let mut node = make_node(make_config(&[]));
    assert!(matches!(node.start(1), Err(NodeError::AlreadyStarted)));
}

#[test]
fn test_bad_bounds_fail_only_that_link() {
    let bad = KeyBufferConfig::new(5_000, 1_000, 20_000, 10_000);
    let config = make_config(&[(2, bad), (3, small_buffer(15_000))]);
    let mut node = Node::new(config, EventQueue::new(), RecordingTransport::new()).unwrap();

    let failures = node.start(0).unwrap();
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0], LinkError::Buffer { .. }));
    assert!(node.buffer(n(2)).is_none());
    assert!(node.buffer(n(3)).is_some());
}

#[test]
fn test_start_runs_even_if_every_link_fails() {
    let bad = KeyBufferConfig::new(5_000, 1_000, 20_000, 10_000);
    let config = make_config(&[(2, bad)]);
    let mut node = Node::new(config, EventQueue::new(), RecordingTransport::new()).unwrap();
    assert_eq!(node.state(), NodeState::Created);

    let failures = node.start(0).unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(node.state(), NodeState::Running);
    assert!(node.links().is_empty());
}

#[test]
fn test_start_after_shutdown_keeps_stopped() {
    let mut node = make_node(make_config(&[(2, small_buffer(15_000))]));
    node.shutdown();

    assert!(matches!(node.start(10), Err(NodeError::AlreadyStarted)));
    assert_eq!(node.state(), NodeState::Stopped);
    assert!(node.links().is_empty());
    assert!(matches!(
        node.establish_link(n(2), &small_buffer(15_000), 10),
        Err(NodeError::NotRunning(NodeState::Stopped))
    ));
}

#[test]
fn test_establish_duplicate_link() {
    let mut node = make_node(make_config(&[(2, small_buffer(15_000))]));
    let result = node.establish_link(n(2), &small_buffer(15_000), 5);
    assert!(matches!(
        result,
        Err(NodeError::Link(LinkError::AlreadyEstablished(_)))
    ));
}

#[test]
fn test_drain_events_empties() {
    // Starting below threshold charges right away
    let mut node = make_node(make_config(&[(2, small_buffer(5_000))]));
    assert_eq!(kinds(&node.drain_events()), vec!["charging_started"]);
    assert!(node.drain_events().is_empty());
}

#[test]
fn test_tick_timer_reschedules() {
    let mut config = make_config(&[]);
    config.node.tick_interval_ms = 500;
    let mut node = make_node(config);
    assert_eq!(node.scheduler().len(), 1);

    assert_eq!(run_until(&mut node, 500), 1);
    assert_eq!(node.scheduler().len(), 1);
    assert_eq!(node.scheduler_mut().peek_time(), Some(1_000));

    node.shutdown();
    assert!(node.scheduler().is_empty());
}

#[test]
fn test_huge_tick_interval_saturates() {
    let mut config = make_config(&[]);
    config.node.tick_interval_ms = u64::MAX;
    let mut node = Node::new(config, EventQueue::new(), RecordingTransport::new()).unwrap();
    node.start(5).unwrap();
    assert_eq!(node.scheduler_mut().peek_time(), Some(u64::MAX));

    let (at, _, event) = node.scheduler_mut().pop_due(u64::MAX).unwrap();
    node.on_timer(event, at);
    assert_eq!(node.scheduler().len(), 1);
    assert_eq!(node.scheduler_mut().peek_time(), Some(u64::MAX));
}

#[test]
fn test_shutdown_idempotent() {
    let mut node = make_node(make_config(&[(2, small_buffer(15_000))]));
    node.shutdown();
    node.shutdown();
    assert_eq!(node.state(), NodeState::Stopped);
    assert!(node.links().is_empty());

    let result = node.send_secured(packet(1, 2, 100), None, 10);
    assert!(matches!(
        result,
        Err(NodeError::NotRunning(NodeState::Stopped))
    ));
}

#[test]
fn test_link_stats_exposed() {
    let mut node = make_node(make_config(&[(2, small_buffer(15_000))]));
    node.send_secured(packet(1, 2, 100), None, 0).unwrap();

    let stats = node.link_stats(n(2)).unwrap();
    assert_eq!(stats.packets_secured, 1);
    assert_eq!(stats.bytes_secured, 100);
    assert_eq!(stats.key_bytes_consumed, 132);
    assert!(node.link_stats(n(9)).is_none());
}
