//! Secured link configuration.
//!
//! The `buffer.*` defaults and the `links` list. Bounds are validated when
//! the link is brought up, not when the file is parsed.

use serde::{Deserialize, Serialize};

use crate::link::NodeId;

/// Key buffer bounds in bytes (`buffer.*`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBufferConfig {
    /// Hard floor (`buffer.minimum`).
    #[serde(default = "KeyBufferConfig::default_minimum")]
    pub minimum: u64,
    /// Charging trigger (`buffer.threshold`).
    #[serde(default = "KeyBufferConfig::default_threshold")]
    pub threshold: u64,
    /// Capacity (`buffer.maximum`).
    #[serde(default = "KeyBufferConfig::default_maximum")]
    pub maximum: u64,
    /// Fill level when the link comes up (`buffer.initial`).
    #[serde(default = "KeyBufferConfig::default_initial")]
    pub initial: u64,
}

impl Default for KeyBufferConfig {
    fn default() -> Self {
        Self {
            minimum: 1_048_576,
            threshold: 11_324_620,
            maximum: 52_428_800,
            initial: 52_428_800,
        }
    }
}

impl KeyBufferConfig {
    fn default_minimum() -> u64 { 1_048_576 }
    fn default_threshold() -> u64 { 11_324_620 }
    fn default_maximum() -> u64 { 52_428_800 }
    fn default_initial() -> u64 { 52_428_800 }

    /// Merge `buffer.*` from a later file.
    pub fn merge(&mut self, other: KeyBufferConfig) {
        merge_fields!(self, other, [minimum, threshold, maximum, initial]);
    }

    /// Create bounds from the four raw parameters.
    pub fn new(minimum: u64, threshold: u64, maximum: u64, initial: u64) -> Self {
        Self {
            minimum,
            threshold,
            maximum,
            initial,
        }
    }
}

/// A secured link to bring up at startup (`links[]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// The neighbor at the other end.
    pub peer: NodeId,

    /// Per-link bounds; falls back to `buffer.*` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer: Option<KeyBufferConfig>,
}

impl LinkConfig {
    /// Create a link entry using the default bounds.
    pub fn new(peer: NodeId) -> Self {
        Self { peer, buffer: None }
    }

    /// Override the buffer bounds for this link.
    pub fn with_buffer(mut self, buffer: KeyBufferConfig) -> Self {
        self.buffer = Some(buffer);
        self
    }

    /// Bounds for this link, falling back to `defaults`.
    pub fn buffer_or<'a>(&'a self, defaults: &'a KeyBufferConfig) -> &'a KeyBufferConfig {
        self.buffer.as_ref().unwrap_or(defaults)
    }
}
