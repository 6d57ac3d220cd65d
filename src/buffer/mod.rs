//! Key Buffer
//!
//! A link-scoped pool of symmetric key material. Data traffic debits the
//! pool, the charging process credits it, and both report when the level
//! crosses the replenishment threshold.
//!
//! ## Bounds
//!
//! ```text
//!  0 ──── minimum ──── threshold ──── maximum
//!          floor        refill below   capacity
//! ```
//!
//! `minimum <= current <= maximum` holds after every operation. A debit
//! that would cross the floor is refused whole; a credit past capacity is
//! truncated.

use std::fmt;
use thiserror::Error;

use crate::config::KeyBufferConfig;
use crate::link::LinkKey;


/// Errors related to key buffer operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    #[error(
        "configuration error: need minimum <= current <= maximum and threshold in [minimum, maximum] \
         (minimum={minimum}, threshold={threshold}, maximum={maximum}, current={current})"
    )]
    Configuration {
        minimum: u64,
        threshold: u64,
        maximum: u64,
        current: u64,
    },

    #[error("insufficient key material: requested {requested} bytes, {available} above the floor")]
    InsufficientKeyMaterial { requested: u64, available: u64 },
}

/// Which side of the threshold a buffer sits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferLevel {
    /// `current >= threshold`.
    Sufficient,
    /// `current < threshold`; charging should run.
    BelowThreshold,
}

impl fmt::Display for BufferLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BufferLevel::Sufficient => "sufficient",
            BufferLevel::BelowThreshold => "below-threshold",
        };
        write!(f, "{}", s)
    }
}

/// Notification that a buffer crossed its threshold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelChange {
    /// Link whose buffer changed level.
    pub link: LinkKey,
    /// The level after the operation.
    pub level: BufferLevel,
    /// Bytes in the buffer after the operation.
    pub current: u64,
}

impl LevelChange {
    /// Check if this change dropped the buffer below its threshold.
    pub fn is_drop(&self) -> bool {
        self.level == BufferLevel::BelowThreshold
    }
}

/// Result of a credit operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Credited {
    /// Bytes actually added (the rest was above capacity).
    pub applied: u64,
    /// Threshold crossing caused by this credit, if any.
    pub change: Option<LevelChange>,
}

/// Shared key pool for one secured link.
#[derive(Clone, Debug)]
pub struct KeyBuffer {
    link: LinkKey,
    minimum: u64,
    threshold: u64,
    maximum: u64,
    current: u64,
}

impl KeyBuffer {
    /// Create a buffer from validated bounds.
    pub fn new(link: LinkKey, config: &KeyBufferConfig) -> Result<Self, BufferError> {
        Self::with_bounds(
            link,
            config.minimum,
            config.threshold,
            config.maximum,
            config.initial,
        )
    }

    /// Create a buffer from explicit bounds.
    ///
    /// Fails with [`BufferError::Configuration`] unless
    /// `minimum <= current <= maximum` and `minimum <= threshold <= maximum`.
    pub fn with_bounds(
        link: LinkKey,
        minimum: u64,
        threshold: u64,
        maximum: u64,
        current: u64,
    ) -> Result<Self, BufferError> {
        let ordered = minimum <= current
            && current <= maximum
            && minimum <= threshold
            && threshold <= maximum;
        if !ordered {
            return Err(BufferError::Configuration {
                minimum,
                threshold,
                maximum,
                current,
            });
        }
        Ok(Self {
            link,
            minimum,
            threshold,
            maximum,
            current,
        })
    }

    /// Link this buffer secures.
    pub fn link(&self) -> LinkKey {
        self.link
    }

    /// Hard floor.
    pub fn minimum(&self) -> u64 {
        self.minimum
    }

    /// Replenishment trigger.
    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Capacity.
    pub fn maximum(&self) -> u64 {
        self.maximum
    }

    /// Bytes in the buffer now.
    pub fn current(&self) -> u64 {
        self.current
    }

    /// Bytes that can still be debited before hitting the floor.
    pub fn available(&self) -> u64 {
        self.current - self.minimum
    }

    /// Bytes that can still be credited before hitting capacity.
    pub fn headroom(&self) -> u64 {
        self.maximum - self.current
    }

    /// `current < threshold`.
    pub fn is_below_threshold(&self) -> bool {
        self.current < self.threshold
    }

    /// Check if the buffer is at capacity.
    pub fn is_full(&self) -> bool {
        self.current == self.maximum
    }

    /// Check if nothing can be debited.
    pub fn is_depleted(&self) -> bool {
        self.current == self.minimum
    }

    /// Current side of the threshold.
    pub fn level(&self) -> BufferLevel {
        if self.is_below_threshold() {
            BufferLevel::BelowThreshold
        } else {
            BufferLevel::Sufficient
        }
    }

    /// Debit `amount` bytes, all or nothing.
    ///
    /// Check and decrement happen in one call with no suspension point in
    /// between. Returns the threshold crossing this debit caused, if any.
    pub fn try_debit(&mut self, amount: u64) -> Result<Option<LevelChange>, BufferError> {
        let available = self.available();
        if amount > available {
            return Err(BufferError::InsufficientKeyMaterial {
                requested: amount,
                available,
            });
        }
        let before = self.level();
        self.current -= amount;
        Ok(self.crossing(before))
    }

    /// Credit up to `amount` bytes; anything above capacity is dropped.
    pub fn credit(&mut self, amount: u64) -> Credited {
        let before = self.level();
        let applied = amount.min(self.headroom());
        self.current += applied;
        Credited {
            applied,
            change: self.crossing(before),
        }
    }

    fn crossing(&self, before: BufferLevel) -> Option<LevelChange> {
        let level = self.level();
        (level != before).then_some(LevelChange {
            link: self.link,
            level,
            current: self.current,
        })
    }
}
