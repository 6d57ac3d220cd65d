//! Charging driver: turns controller decisions into charge requests and
//! timers, and feeds deliveries back into the buffers.

use super::{Node, NodeError, TimerEvent};
use crate::charging::ChargingStatus;
use crate::events::KeyEvent;
use crate::link::{LinkError, LinkKey, NodeId};
use crate::sim::Scheduler;
use crate::transport::Transport;
use tracing::{debug, warn};

impl<S, T> Node<S, T>
where
    S: Scheduler<TimerEvent>,
    T: Transport,
{
    /// Credit `bytes` of fresh key delivered for the link to `peer`.
    ///
    /// Fails with `ChargingError::NoSession` for a delivery that arrives
    /// after its session ended; nothing is credited in that case.
    pub fn on_charge_delivered(
        &mut self,
        peer: NodeId,
        bytes: u64,
        now_ms: u64,
    ) -> Result<(), NodeError> {
        let key = self.link_key(peer);
        let link = self.links.get_mut(&key).ok_or(LinkError::NotFound(key))?;
        let (buffer, stats) = link.parts_mut();

        let delivery = self.charging.on_delivery(buffer, bytes, now_ms)?;
        stats.record_charged(delivery.applied);
        let current = buffer.current();

        if let Some(change) = delivery.level_change {
            self.on_level_change(change, now_ms);
        }

        match delivery.status {
            ChargingStatus::Continue { .. } => {
                if let Some(session) = self.charging.session(&key) {
                    self.events.push(KeyEvent::ChargingProgress {
                        link: key,
                        session: session.id(),
                        applied: delivery.applied,
                        current,
                    });
                }
                let at = now_ms.saturating_add(self.config.charging.round_interval_ms);
                let timer = self.scheduler.schedule_at(at, TimerEvent::ChargingRound(key));
                if let Some(replaced) = self.charging.set_follow_up(&key, timer)? {
                    self.scheduler.cancel(replaced);
                }
            }
            ChargingStatus::Completed(session) => {
                if let Some(timer) = session.follow_up() {
                    self.scheduler.cancel(timer);
                }
                if let Some(stats) = self.links.get_mut(&key).map(|l| l.stats_mut()) {
                    stats.record_session_end(true);
                }
                self.events.push(KeyEvent::ChargingCompleted {
                    link: key,
                    session: session.id(),
                    delivered: session.delivered_bytes(),
                    applied: session.applied_bytes(),
                });
            }
        }
        Ok(())
    }

    /// Abandon charging on the link to `peer` after a transport failure.
    ///
    /// The link stays idle until the next threshold check. Returns false
    /// if the link was not charging.
    pub fn on_charge_failed(&mut self, peer: NodeId, reason: &str) -> bool {
        let key = self.link_key(peer);
        self.abandon_charging(key, reason)
    }

    /// Open a charging session for `link` if its buffer needs one.
    pub(super) fn maybe_start_charging(&mut self, link: LinkKey, now_ms: u64) {
        let Some(buffer) = self.links.buffer(&link) else {
            return;
        };
        let Some(started) = self.charging.check_threshold(buffer, now_ms) else {
            return;
        };

        self.events.push(KeyEvent::ChargingStarted {
            link,
            session: started.session,
            target_bytes: started.target_bytes,
        });

        if let Err(e) = self.transport.request_charge(link, started.first_round, now_ms) {
            self.abandon_charging(link, &e.to_string());
        }
    }

    /// Follow-up timer fired: ask for the next round.
    pub(super) fn run_charging_round(&mut self, link: LinkKey, now_ms: u64) {
        self.charging.clear_follow_up(&link);
        let Some(bytes) = self.charging.next_round(&link) else {
            debug!(link = %link, "Charging round for closed session ignored");
            return;
        };
        if let Err(e) = self.transport.request_charge(link, bytes, now_ms) {
            self.abandon_charging(link, &e.to_string());
        }
    }

    fn abandon_charging(&mut self, link: LinkKey, reason: &str) -> bool {
        let Some(abandoned) = self.charging.on_transport_failure(&link, reason) else {
            return false;
        };
        if let Some(timer) = abandoned.session.follow_up() {
            self.scheduler.cancel(timer);
        }
        if let Some(l) = self.links.get_mut(&link) {
            l.stats_mut().record_session_end(false);
        } else {
            warn!(link = %link, "Abandoned charging on a link that is gone");
        }
        self.events.push(KeyEvent::ChargingAbandoned {
            link,
            session: abandoned.session.id(),
            delivered: abandoned.session.delivered_bytes(),
            reason: reason.to_string(),
        });
        true
    }
}
