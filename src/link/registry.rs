//! Link registry: the single owner of every key buffer.

use std::collections::HashMap;

use tracing::info;

use super::{LinkError, LinkKey, LinkStats, NodeId};
use crate::buffer::KeyBuffer;
use crate::config::KeyBufferConfig;

/// A secured link and the key pool behind it.
#[derive(Clone, Debug)]
pub struct SecuredLink {
    key: LinkKey,
    buffer: KeyBuffer,
    stats: LinkStats,
    established_at_ms: u64,
}

impl SecuredLink {
    /// Link identity.
    pub fn key(&self) -> LinkKey {
        self.key
    }

    /// The key pool.
    pub fn buffer(&self) -> &KeyBuffer {
        &self.buffer
    }

    /// Mutable access to the key pool.
    pub fn buffer_mut(&mut self) -> &mut KeyBuffer {
        &mut self.buffer
    }

    /// Per-link counters.
    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// Mutable access to per-link counters.
    pub fn stats_mut(&mut self) -> &mut LinkStats {
        &mut self.stats
    }

    /// Buffer and stats together, for callers that update both.
    pub fn parts_mut(&mut self) -> (&mut KeyBuffer, &mut LinkStats) {
        (&mut self.buffer, &mut self.stats)
    }

    /// When the link came up (simulated ms).
    pub fn established_at_ms(&self) -> u64 {
        self.established_at_ms
    }

    /// Age of the link in milliseconds.
    pub fn age(&self, current_time_ms: u64) -> u64 {
        current_time_ms.saturating_sub(self.established_at_ms)
    }
}

/// Secured links indexed by their unordered endpoint pair.
///
/// Other components never hold a buffer; they look it up here by
/// [`LinkKey`] each time, so nobody works from a stale copy.
#[derive(Clone, Debug, Default)]
pub struct LinkRegistry {
    links: HashMap<LinkKey, SecuredLink>,
}

impl LinkRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bring up a secured link with the given buffer bounds.
    ///
    /// Bounds are validated here; a bad configuration fails this link
    /// only.
    pub fn establish(
        &mut self,
        key: LinkKey,
        config: &KeyBufferConfig,
        now_ms: u64,
    ) -> Result<&SecuredLink, LinkError> {
        if key.is_loop() {
            return Err(LinkError::SelfLink(key.endpoints().0));
        }
        if self.links.contains_key(&key) {
            return Err(LinkError::AlreadyEstablished(key));
        }

        let buffer =
            KeyBuffer::new(key, config).map_err(|source| LinkError::Buffer { link: key, source })?;

        info!(
            link = %key,
            minimum = buffer.minimum(),
            threshold = buffer.threshold(),
            maximum = buffer.maximum(),
            current = buffer.current(),
            "Secured link established"
        );

        let link = SecuredLink {
            key,
            buffer,
            stats: LinkStats::new(),
            established_at_ms: now_ms,
        };
        Ok(self.links.entry(key).or_insert(link))
    }

    /// Remove a link, destroying its buffer.
    pub fn teardown(&mut self, key: &LinkKey) -> Option<SecuredLink> {
        let removed = self.links.remove(key);
        if let Some(link) = &removed {
            info!(
                link = %key,
                current = link.buffer.current(),
                "Secured link torn down"
            );
        }
        removed
    }

    /// Look up a link.
    pub fn get(&self, key: &LinkKey) -> Option<&SecuredLink> {
        self.links.get(key)
    }

    /// Look up a link mutably.
    pub fn get_mut(&mut self, key: &LinkKey) -> Option<&mut SecuredLink> {
        self.links.get_mut(key)
    }

    /// Look up a link's buffer.
    pub fn buffer(&self, key: &LinkKey) -> Option<&KeyBuffer> {
        self.links.get(key).map(|l| &l.buffer)
    }

    /// Look up a link's buffer mutably.
    pub fn buffer_mut(&mut self, key: &LinkKey) -> Option<&mut KeyBuffer> {
        self.links.get_mut(key).map(|l| &mut l.buffer)
    }

    /// Look up a link's stats.
    pub fn stats(&self, key: &LinkKey) -> Option<&LinkStats> {
        self.links.get(key).map(|l| &l.stats)
    }

    /// Check whether a link is up.
    pub fn contains(&self, key: &LinkKey) -> bool {
        self.links.contains_key(key)
    }

    /// Iterate over all links.
    pub fn iter(&self) -> impl Iterator<Item = &SecuredLink> {
        self.links.values()
    }

    /// All link keys, sorted for deterministic iteration.
    pub fn keys(&self) -> Vec<LinkKey> {
        let mut keys: Vec<_> = self.links.keys().copied().collect();
        keys.sort();
        keys
    }

    /// Nodes with a secured link to `node`, sorted.
    pub fn neighbors(&self, node: NodeId) -> Vec<NodeId> {
        let mut peers: Vec<_> = self.links.keys().filter_map(|k| k.other(node)).collect();
        peers.sort();
        peers
    }

    /// Number of links.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}
