//! Charging Controller
//!
//! Tops up key buffers that fall below their threshold. Each buffer is
//! either `Idle` or `Charging`; at most one session runs per buffer.
//!
//! ```text
//!            below threshold
//!   Idle ─────────────────────▶ Charging
//!    ▲                              │
//!    │   full / target delivered    │
//!    ├──────────────────────────────┤
//!    │   transport failure          │
//!    └──────────────────────────────┘
//! ```
//!
//! The controller does not move bytes itself. The external charging
//! transport reports deliveries and failures; the controller credits the
//! buffer and decides whether the session continues. An abandoned session
//! keeps whatever was already credited and is not retried until the next
//! threshold check.

mod session;

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::buffer::{KeyBuffer, LevelChange};
use crate::config::ChargingConfig;
use crate::link::LinkKey;
use crate::sim::EventId;

pub use session::{ChargingSession, SessionId};

/// Errors related to charging.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChargingError {
    #[error("charging transport failure on link {link}: {reason}")]
    TransportFailure { link: LinkKey, reason: String },

    #[error("no charging session on link {0}")]
    NoSession(LinkKey),
}

/// Per-buffer charging state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChargingState {
    /// No session; waiting for the buffer to drop below threshold.
    Idle,
    /// A session is open.
    Charging,
}

impl fmt::Display for ChargingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChargingState::Idle => "idle",
            ChargingState::Charging => "charging",
        };
        write!(f, "{}", s)
    }
}

/// A session just opened by a threshold check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionStarted {
    pub session: SessionId,
    pub link: LinkKey,
    pub target_bytes: u64,
    /// Bytes to request in the first round.
    pub first_round: u64,
}

/// What happens after a delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChargingStatus {
    /// More rounds needed; request `next_round` bytes.
    Continue { next_round: u64 },
    /// The session finished and was closed.
    Completed(ChargingSession),
}

/// Result of crediting one delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    /// Bytes that fit into the buffer.
    pub applied: u64,
    /// Threshold crossing caused by the credit.
    pub level_change: Option<LevelChange>,
    pub status: ChargingStatus,
}

/// A session closed by a transport failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Abandoned {
    pub session: ChargingSession,
    pub cause: ChargingError,
}

/// Drives replenishment for every buffer on a node.
#[derive(Clone, Debug)]
pub struct ChargingController {
    send_size: u64,
    total_amount: u64,
    sessions: HashMap<LinkKey, ChargingSession>,
    next_session_id: u64,
}

impl ChargingController {
    /// Create a controller from `charging.*`.
    pub fn new(config: &ChargingConfig) -> Self {
        Self {
            send_size: config.send_size.max(1),
            total_amount: config.total_amount,
            sessions: HashMap::new(),
            next_session_id: 1,
        }
    }

    /// Charging state of a link.
    pub fn state(&self, link: &LinkKey) -> ChargingState {
        if self.sessions.contains_key(link) {
            ChargingState::Charging
        } else {
            ChargingState::Idle
        }
    }

    /// Open session for a link.
    pub fn session(&self, link: &LinkKey) -> Option<&ChargingSession> {
        self.sessions.get(link)
    }

    /// Number of open sessions.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Open a session if `buffer` is below threshold and idle.
    ///
    /// A second trigger while charging is a no-op. The session targets the
    /// buffer's headroom, capped by `charging.total_amount` when set.
    pub fn check_threshold(&mut self, buffer: &KeyBuffer, now_ms: u64) -> Option<SessionStarted> {
        let link = buffer.link();
        if !buffer.is_below_threshold() || self.sessions.contains_key(&link) {
            return None;
        }

        let mut target_bytes = buffer.headroom();
        if self.total_amount > 0 {
            target_bytes = target_bytes.min(self.total_amount);
        }

        let id = SessionId::new(self.next_session_id);
        self.next_session_id += 1;
        let session = ChargingSession::new(id, link, target_bytes, now_ms);
        let first_round = session.round_size(self.send_size);
        self.sessions.insert(link, session);

        info!(
            link = %link,
            session = %id,
            current = buffer.current(),
            threshold = buffer.threshold(),
            target_bytes,
            "Charging session started"
        );

        Some(SessionStarted {
            session: id,
            link,
            target_bytes,
            first_round,
        })
    }

    /// Credit `bytes` delivered by the charging transport.
    ///
    /// The session closes once the buffer is full or the target has been
    /// delivered.
    pub fn on_delivery(
        &mut self,
        buffer: &mut KeyBuffer,
        bytes: u64,
        now_ms: u64,
    ) -> Result<Delivery, ChargingError> {
        let link = buffer.link();
        let session = self
            .sessions
            .get_mut(&link)
            .ok_or(ChargingError::NoSession(link))?;

        let credited = buffer.credit(bytes);
        session.record_delivery(bytes, credited.applied);

        debug!(
            link = %link,
            session = %session.id(),
            delivered = bytes,
            applied = credited.applied,
            current = buffer.current(),
            "Charging delivery credited"
        );

        let status = if buffer.is_full() || session.remaining() == 0 {
            let session = self
                .sessions
                .remove(&link)
                .ok_or(ChargingError::NoSession(link))?;
            info!(
                link = %link,
                session = %session.id(),
                delivered = session.delivered_bytes(),
                applied = session.applied_bytes(),
                elapsed_ms = session.age(now_ms),
                "Charging session completed"
            );
            ChargingStatus::Completed(session)
        } else {
            ChargingStatus::Continue {
                next_round: session.round_size(self.send_size),
            }
        };

        Ok(Delivery {
            applied: credited.applied,
            level_change: credited.change,
            status,
        })
    }

    /// Abandon the session after a charging transport failure.
    ///
    /// Credit already applied stays in the buffer. Returns `None` when the
    /// link was not charging.
    pub fn on_transport_failure(
        &mut self,
        link: &LinkKey,
        reason: impl Into<String>,
    ) -> Option<Abandoned> {
        let session = self.sessions.remove(link)?;
        let cause = ChargingError::TransportFailure {
            link: *link,
            reason: reason.into(),
        };
        warn!(
            link = %link,
            session = %session.id(),
            delivered = session.delivered_bytes(),
            error = %cause,
            "Charging session abandoned"
        );
        Some(Abandoned { session, cause })
    }

    /// Record the timer for the session's next round.
    ///
    /// Returns the timer it replaced, which the caller should cancel.
    pub fn set_follow_up(
        &mut self,
        link: &LinkKey,
        event: EventId,
    ) -> Result<Option<EventId>, ChargingError> {
        let session = self
            .sessions
            .get_mut(link)
            .ok_or(ChargingError::NoSession(*link))?;
        Ok(session.set_follow_up(event))
    }

    /// Clear the follow-up timer once it has fired.
    pub fn clear_follow_up(&mut self, link: &LinkKey) -> Option<EventId> {
        self.sessions.get_mut(link)?.take_follow_up()
    }

    /// Bytes to request in the next round, if charging.
    pub fn next_round(&self, link: &LinkKey) -> Option<u64> {
        self.sessions.get(link).map(|s| s.round_size(self.send_size))
    }

    /// Close a session without completing it (link teardown).
    ///
    /// Idempotent: a second call returns `None`. The caller cancels the
    /// returned session's follow-up timer.
    pub fn cancel(&mut self, link: &LinkKey) -> Option<ChargingSession> {
        let session = self.sessions.remove(link)?;
        debug!(link = %link, session = %session.id(), "Charging session cancelled");
        Some(session)
    }
}
