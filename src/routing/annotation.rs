//! Per-route key annotations.

use std::fmt;

use super::RouteId;
use crate::accounting::TrafficClass;
use crate::buffer::KeyBuffer;

/// Coarse key state of a route's next-hop link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyGrade {
    /// No secured link to the next hop.
    Unsecured,
    /// Nothing above the buffer floor.
    Depleted,
    /// Below the per-class minimum.
    Insufficient,
    /// Usable, but the buffer is below its charging threshold.
    Low,
    /// Usable and above threshold.
    Healthy,
}

impl KeyGrade {
    /// Grade a buffer against a per-class minimum.
    pub fn of(buffer: Option<&KeyBuffer>, class_min_bytes: u64) -> Self {
        match buffer {
            None => KeyGrade::Unsecured,
            Some(b) if b.is_depleted() => KeyGrade::Depleted,
            Some(b) if b.current() < class_min_bytes => KeyGrade::Insufficient,
            Some(b) if b.is_below_threshold() => KeyGrade::Low,
            Some(_) => KeyGrade::Healthy,
        }
    }
}

impl fmt::Display for KeyGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KeyGrade::Unsecured => "unsecured",
            KeyGrade::Depleted => "depleted",
            KeyGrade::Insufficient => "insufficient",
            KeyGrade::Low => "low",
            KeyGrade::Healthy => "healthy",
        };
        write!(f, "{}", s)
    }
}

/// Key viability of one route for one traffic class, as last checked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteKeyAnnotation {
    pub route: RouteId,
    pub class: TrafficClass,
    /// Whether the route may carry this class right now.
    pub viable: bool,
    pub grade: KeyGrade,
    /// Usable key bytes on the next-hop link at check time.
    pub available: u64,
    pub checked_at_ms: u64,
    /// Annotation epoch the check belongs to.
    pub epoch: u64,
}

impl RouteKeyAnnotation {
    /// Annotate `route` from the next-hop buffer's live state.
    ///
    /// Secured traffic needs a secured link with `current >= class_min`
    /// and at least one byte above the floor. Best-effort traffic is
    /// viable whenever its minimum is met, with or without a secured link.
    pub(crate) fn evaluate(
        route: RouteId,
        class: TrafficClass,
        buffer: Option<&KeyBuffer>,
        class_min_bytes: u64,
        now_ms: u64,
        epoch: u64,
    ) -> Self {
        let grade = KeyGrade::of(buffer, class_min_bytes);
        let available = buffer.map_or(0, KeyBuffer::available);
        let viable = match (class, buffer) {
            (TrafficClass::Secured, Some(b)) => b.current() >= class_min_bytes && available > 0,
            (TrafficClass::Secured, None) => false,
            (TrafficClass::BestEffort, Some(b)) => b.current() >= class_min_bytes,
            (TrafficClass::BestEffort, None) => class_min_bytes == 0,
        };

        Self {
            route,
            class,
            viable,
            grade,
            available,
            checked_at_ms: now_ms,
            epoch,
        }
    }
}
