//! Node lifecycle: start, link bring-up and teardown, shutdown, tick.

use super::{Node, NodeError, NodeState, TimerEvent};
use crate::config::KeyBufferConfig;
use crate::link::{LinkError, NodeId};
use crate::routing::RoutingProtocol;
use crate::sim::Scheduler;
use crate::transport::Transport;
use tracing::{debug, info, warn};

impl<S, T> Node<S, T>
where
    S: Scheduler<TimerEvent>,
    T: Transport,
{
    /// Bring up the configured links and start periodic maintenance.
    ///
    /// A link whose buffer bounds are invalid is skipped; its error is
    /// returned alongside the others so the caller can report it. The
    /// remaining links come up regardless.
    pub fn start(&mut self, now_ms: u64) -> Result<Vec<LinkError>, NodeError> {
        if self.state != NodeState::Created {
            return Err(NodeError::AlreadyStarted);
        }

        let defaults = &self.config.buffer;
        let links: Vec<_> = self
            .config
            .links
            .iter()
            .map(|l| (l.peer, l.buffer_or(defaults).clone()))
            .collect();

        let mut failures = Vec::new();
        for (peer, bounds) in links {
            if let Err(e) = self.bring_up_link(peer, &bounds, now_ms) {
                warn!(node = %self.id, peer = %peer, error = %e, "Failed to bring up link");
                failures.push(e);
            }
        }

        self.state = NodeState::Running;
        if self.config.node.tick_interval_ms == 0 {
            warn!(
                node = %self.id,
                "Periodic tick disabled; idle buffers below threshold recharge only on explicit tick()"
            );
        }
        self.schedule_tick(now_ms);
        info!(
            node = %self.id,
            links = self.links.len(),
            failed = failures.len(),
            "Node started"
        );
        Ok(failures)
    }

    /// Establish a secured link to `peer` with the given buffer bounds.
    ///
    /// The proactive protocol learns the one-hop route. If the buffer
    /// starts below its threshold charging begins immediately.
    pub fn establish_link(
        &mut self,
        peer: NodeId,
        bounds: &KeyBufferConfig,
        now_ms: u64,
    ) -> Result<(), NodeError> {
        if self.state == NodeState::Stopped {
            return Err(NodeError::NotRunning(self.state));
        }
        Ok(self.bring_up_link(peer, bounds, now_ms)?)
    }

    fn bring_up_link(
        &mut self,
        peer: NodeId,
        bounds: &KeyBufferConfig,
        now_ms: u64,
    ) -> Result<(), LinkError> {
        let key = self.link_key(peer);
        self.links.establish(key, bounds, now_ms)?;

        if let Some(dv) = self.protocols.distance_vector_mut() {
            dv.add_neighbor(peer, 0, now_ms);
        }
        self.maybe_start_charging(key, now_ms);
        Ok(())
    }

    /// Tear down the link to `peer`.
    ///
    /// Cancels the link's charging session and its follow-up timer, drops
    /// packets queued toward `peer` along with their deadlines, forgets
    /// route annotations and routes through `peer`, and destroys the
    /// buffer. Returns false if there was no such link; calling it again is
    /// harmless.
    pub fn teardown_link(&mut self, peer: NodeId) -> bool {
        let key = self.link_key(peer);

        if let Some(session) = self.charging.cancel(&key)
            && let Some(timer) = session.follow_up()
        {
            self.scheduler.cancel(timer);
        }

        for timer in self.delay.cancel_link(&key) {
            self.scheduler.cancel(timer);
        }
        let dropped = self.queues.remove(&peer).map_or(0, |q| q.len());

        let annotations = self.routing.forget_link(&key);
        let routes = self.protocols.remove_next_hop(peer);

        let existed = self.links.teardown(&key).is_some();
        if existed {
            debug!(
                link = %key,
                dropped,
                annotations,
                routes,
                "Link state cleared"
            );
        }
        existed
    }

    /// Tear down every link and stop.
    ///
    /// Idempotent.
    pub fn shutdown(&mut self) {
        if self.state == NodeState::Stopped {
            return;
        }
        for key in self.links.keys() {
            if let Some(peer) = key.other(self.id) {
                self.teardown_link(peer);
            }
        }
        if let Some(timer) = self.tick_timer.take() {
            self.scheduler.cancel(timer);
        }
        self.state = NodeState::Stopped;
        info!(node = %self.id, "Node stopped");
    }

    /// Periodic maintenance.
    ///
    /// Re-checks every idle buffer against its threshold, ages out
    /// reactive routes, and starts a new annotation epoch when one is due.
    /// The threshold re-check is how a link recharges after an abandoned
    /// session or one capped by `charging.total_amount`; with
    /// `node.tick_interval_ms = 0` it happens only when this is called.
    pub fn tick(&mut self, now_ms: u64) {
        for key in self.links.keys() {
            self.maybe_start_charging(key, now_ms);
        }

        let purged = self.protocols.purge_expired(now_ms);
        if purged > 0 {
            debug!(node = %self.id, purged, "Expired routes purged");
        }

        self.routing.maybe_new_epoch(now_ms);
    }

    /// Start route discovery toward `destination` if the protocol supports
    /// it.
    pub(super) fn request_route(&mut self, destination: NodeId, now_ms: u64) -> bool {
        let Ok(protocol) = self.protocols.get_mut(self.role) else {
            return false;
        };
        let Some(request) = protocol.request_route(destination, now_ms) else {
            return false;
        };
        match self.transport.send_route_request(&request) {
            Ok(()) => {
                debug!(
                    destination = %destination,
                    request_id = request.request_id,
                    send_at_ms = request.send_at_ms,
                    "Route request sent"
                );
                true
            }
            Err(e) => {
                warn!(destination = %destination, error = %e, "Failed to send route request");
                false
            }
        }
    }
}
