//! qkdnet Configuration System
//!
//! Loads configuration from YAML files with a cascading priority system:
//! 1. `./qkdnet.yaml` (current directory - highest priority)
//! 2. `~/.config/qkdnet/qkdnet.yaml` (user config directory)
//! 3. `/etc/qkdnet/qkdnet.yaml` (system - lowest priority)
//!
//! Values from higher priority files override those from lower priority files,
//! field by field: a later file that sets one field of a section leaves the
//! other fields as earlier files set them.
//!
//! # YAML Structure
//!
//! ```yaml
//! node:
//!   id: 1
//! buffer:
//!   minimum: 1048576
//!   threshold: 11324620
//!   maximum: 52428800
//!   initial: 52428800
//! charging:
//!   send_size: 524288
//! routing:
//!   protocol: proactive
//!   secured_min_bytes: 2048
//! links:
//!   - peer: 2
//!   - peer: 3
//!     buffer: { minimum: 0, threshold: 1000, maximum: 4000, initial: 4000 }
//! ```

/// Copy each listed field from `$other` into `$self` when it differs from
/// the section default. Fields left unset in a later file keep the value
/// an earlier file gave them.
macro_rules! merge_fields {
    ($self:ident, $other:ident, [$($field:ident),+ $(,)?]) => {{
        let defaults = Self::default();
        $(
            if $other.$field != defaults.$field {
                $self.$field = $other.$field;
            }
        )+
    }};
}

mod link;
mod node;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::link::NodeId;

pub use link::{KeyBufferConfig, LinkConfig};
pub use node::{ChargingConfig, CostConfig, DelayConfig, NodeConfig, RoutingConfig};

/// Default config filename.
const CONFIG_FILENAME: &str = "qkdnet.yaml";

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("node.id is not configured")]
    MissingNodeId,

    #[error("invalid link to {peer}: {reason}")]
    InvalidLink { peer: NodeId, reason: String },
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Node configuration (`node.*`).
    #[serde(default)]
    pub node: NodeConfig,

    /// Default key buffer bounds (`buffer.*`).
    #[serde(default)]
    pub buffer: KeyBufferConfig,

    /// Charging application (`charging.*`).
    #[serde(default)]
    pub charging: ChargingConfig,

    /// Key cost model (`cost.*`).
    #[serde(default)]
    pub cost: CostConfig,

    /// Key-aware routing (`routing.*`).
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Delay bounds (`delay.*`).
    #[serde(default)]
    pub delay: DelayConfig,

    /// Secured links to bring up (`links`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<LinkConfig>,
}

impl Config {
    /// Create a new empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration for node `id` with default sections.
    pub fn for_node(id: NodeId) -> Self {
        let mut config = Self::default();
        config.node.id = Some(id);
        config
    }

    /// Load configuration from the standard search paths.
    ///
    /// Returns a tuple of (config, paths_loaded) where paths_loaded contains
    /// the paths that were successfully loaded.
    pub fn load() -> Result<(Self, Vec<PathBuf>), ConfigError> {
        let search_paths = Self::search_paths();
        Self::load_from_paths(&search_paths)
    }

    /// Load configuration from specific paths.
    ///
    /// Paths are processed in order, with later paths overriding earlier ones.
    pub fn load_from_paths(paths: &[PathBuf]) -> Result<(Self, Vec<PathBuf>), ConfigError> {
        let mut config = Config::default();
        let mut loaded_paths = Vec::new();

        for path in paths {
            if path.exists() {
                let file_config = Self::load_file(path)?;
                config.merge(file_config);
                loaded_paths.push(path.clone());
            }
        }

        Ok((config, loaded_paths))
    }

    /// Load configuration from a single file.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        serde_yaml::from_str(&contents).map_err(|e| ConfigError::ParseYaml {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Get the standard search paths in priority order (lowest to highest).
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        // System config (lowest priority)
        paths.push(PathBuf::from("/etc/qkdnet").join(CONFIG_FILENAME));

        // User config directory
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("qkdnet").join(CONFIG_FILENAME));
        }

        // Home directory
        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".qkdnet.yaml"));
        }

        // Current directory (highest priority)
        paths.push(PathBuf::from(".").join(CONFIG_FILENAME));

        paths
    }

    /// Merge another configuration into this one.
    ///
    /// Field by field: a value in `other` overrides ours when it differs
    /// from its default, so a later file cannot reset a field to its
    /// default. `node.id` overrides when present; `links` replace when
    /// non-empty.
    pub fn merge(&mut self, other: Config) {
        self.node.merge(other.node);
        self.buffer.merge(other.buffer);
        self.charging.merge(other.charging);
        self.cost.merge(other.cost);
        self.routing.merge(other.routing);
        self.delay.merge(other.delay);
        // Merge links (replace if non-empty)
        if !other.links.is_empty() {
            self.links = other.links;
        }
    }

    /// The configured node ID.
    pub fn node_id(&self) -> Result<NodeId, ConfigError> {
        self.node.id.ok_or(ConfigError::MissingNodeId)
    }

    /// Check the link list for structural mistakes.
    ///
    /// Buffer bounds are checked later, when each link is brought up, so
    /// one bad link does not prevent the others from starting.
    pub fn validate_links(&self) -> Result<(), ConfigError> {
        let own = self.node_id()?;
        let mut seen = std::collections::HashSet::new();
        for link in &self.links {
            if link.peer == own {
                return Err(ConfigError::InvalidLink {
                    peer: link.peer,
                    reason: "peer is this node".into(),
                });
            }
            if !seen.insert(link.peer) {
                return Err(ConfigError::InvalidLink {
                    peer: link.peer,
                    reason: "listed more than once".into(),
                });
            }
        }
        Ok(())
    }

    /// Serialize this configuration to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounting::{AuthMode, EncryptionMode};
    use crate::routing::ProtocolRole;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_empty_config() {
        let config = Config::new();
        assert!(config.node.id.is_none());
        assert!(config.links.is_empty());
        assert!(matches!(config.node_id(), Err(ConfigError::MissingNodeId)));
    }

    #[test]
    fn test_parse_yaml_empty() {
        let config: Config = serde_yaml::from_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_default_buffer_bounds() {
        let config = Config::new();
        assert_eq!(config.buffer.minimum, 1_048_576);
        assert_eq!(config.buffer.threshold, 11_324_620);
        assert_eq!(config.buffer.maximum, 52_428_800);
        assert_eq!(config.buffer.initial, 52_428_800);
    }

    #[test]
    fn test_parse_full_yaml() {
        let yaml = r#"
node:
  id: 1
  tick_interval_ms: 250
buffer:
  minimum: 100
  threshold: 500
  maximum: 1000
  initial: 800
charging:
  send_size: 64
  round_interval_ms: 5
  total_amount: 256
cost:
  encryption: aes256
  authentication: none
routing:
  protocol: reactive
  secured_min_bytes: 128
delay:
  default_max_delay_ms: 40
links:
  - peer: 2
  - peer: 3
    buffer:
      minimum: 0
      threshold: 10
      maximum: 20
      initial: 20
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.node_id().unwrap(), NodeId::new(1));
        assert_eq!(config.node.tick_interval_ms, 250);
        assert_eq!(config.buffer, KeyBufferConfig::new(100, 500, 1000, 800));
        assert_eq!(config.charging.send_size, 64);
        assert_eq!(config.charging.total_amount, 256);
        assert_eq!(config.cost.encryption, EncryptionMode::Aes256);
        assert_eq!(config.cost.authentication, AuthMode::None);
        assert_eq!(config.cost.auth_tag_bytes, 32);
        assert_eq!(config.routing.protocol, ProtocolRole::Reactive);
        assert_eq!(config.routing.secured_min_bytes, 128);
        assert_eq!(config.delay.default_max_delay_ms, 40);

        assert_eq!(config.links.len(), 2);
        assert_eq!(config.links[0].buffer_or(&config.buffer), &config.buffer);
        assert_eq!(
            config.links[1].buffer_or(&config.buffer),
            &KeyBufferConfig::new(0, 10, 20, 20)
        );
    }

    #[test]
    fn test_parse_partial_section_uses_field_defaults() {
        let yaml = r#"
buffer:
  threshold: 2000000
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.buffer.threshold, 2_000_000);
        assert_eq!(config.buffer.minimum, 1_048_576);
        assert_eq!(config.buffer.maximum, 52_428_800);
    }

    #[test]
    fn test_merge_configs() {
        let mut base = Config::for_node(NodeId::new(1));
        base.links.push(LinkConfig::new(NodeId::new(2)));

        let mut override_config = Config::new();
        override_config.charging.send_size = 1024;

        base.merge(override_config);
        assert_eq!(base.node.id, Some(NodeId::new(1)));
        assert_eq!(base.charging.send_size, 1024);
        assert_eq!(base.links.len(), 1);
    }

    #[test]
    fn test_merge_overrides_id_and_links() {
        let mut base = Config::for_node(NodeId::new(1));
        base.links.push(LinkConfig::new(NodeId::new(2)));

        let mut override_config = Config::for_node(NodeId::new(5));
        override_config.links.push(LinkConfig::new(NodeId::new(6)));
        override_config.links.push(LinkConfig::new(NodeId::new(7)));

        base.merge(override_config);
        assert_eq!(base.node.id, Some(NodeId::new(5)));
        assert_eq!(base.links.len(), 2);
    }

    #[test]
    fn test_validate_links() {
        let mut config = Config::for_node(NodeId::new(1));
        config.links.push(LinkConfig::new(NodeId::new(2)));
        assert!(config.validate_links().is_ok());

        config.links.push(LinkConfig::new(NodeId::new(2)));
        assert!(matches!(
            config.validate_links(),
            Err(ConfigError::InvalidLink { .. })
        ));

        let mut config = Config::for_node(NodeId::new(1));
        config.links.push(LinkConfig::new(NodeId::new(1)));
        assert!(config.validate_links().is_err());
    }

    #[test]
    fn test_load_from_paths_merges() {
        let temp_dir = TempDir::new().unwrap();
        let low_priority = temp_dir.path().join("low.yaml");
        let high_priority = temp_dir.path().join("high.yaml");

        fs::write(
            &low_priority,
            r#"
node:
  id: 1
charging:
  send_size: 100
"#,
        )
        .unwrap();
        fs::write(
            &high_priority,
            r#"
node:
  id: 2
"#,
        )
        .unwrap();

        let paths = vec![low_priority, high_priority];
        let (config, loaded) = Config::load_from_paths(&paths).unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(config.node.id, Some(NodeId::new(2)));
        assert_eq!(config.charging.send_size, 100);
    }

    #[test]
    fn test_load_from_paths_merges_fields_within_section() {
        let temp_dir = TempDir::new().unwrap();
        let low_priority = temp_dir.path().join("low.yaml");
        let high_priority = temp_dir.path().join("high.yaml");

        fs::write(
            &low_priority,
            r#"
routing:
  seed: 77
  secured_min_bytes: 4096
buffer:
  minimum: 10
  threshold: 100
"#,
        )
        .unwrap();
        fs::write(
            &high_priority,
            r#"
routing:
  epoch_ms: 1234
buffer:
  threshold: 200
"#,
        )
        .unwrap();

        let (config, _) = Config::load_from_paths(&[low_priority, high_priority]).unwrap();

        assert_eq!(config.routing.seed, 77);
        assert_eq!(config.routing.secured_min_bytes, 4096);
        assert_eq!(config.routing.epoch_ms, 1234);
        assert_eq!(config.routing.route_lifetime_ms, 3_000);

        assert_eq!(config.buffer.minimum, 10);
        assert_eq!(config.buffer.threshold, 200);
        assert_eq!(config.buffer.maximum, 52_428_800);
    }

    #[test]
    fn test_merge_sections_field_by_field() {
        let mut base = Config::for_node(NodeId::new(1));
        base.node.tick_interval_ms = 250;
        base.charging.total_amount = 9_000;
        base.cost.encryption = EncryptionMode::Aes256;
        base.delay.default_max_delay_ms = 40;

        let mut later = Config::new();
        later.charging.send_size = 64;
        later.cost.auth_tag_bytes = 16;

        base.merge(later);
        assert_eq!(base.node.id, Some(NodeId::new(1)));
        assert_eq!(base.node.tick_interval_ms, 250);
        assert_eq!(base.charging.total_amount, 9_000);
        assert_eq!(base.charging.send_size, 64);
        assert_eq!(base.cost.encryption, EncryptionMode::Aes256);
        assert_eq!(base.cost.auth_tag_bytes, 16);
        assert_eq!(base.delay.default_max_delay_ms, 40);
    }

    #[test]
    fn test_load_skips_missing_files() {
        let temp_dir = TempDir::new().unwrap();
        let existing = temp_dir.path().join("exists.yaml");
        let missing = temp_dir.path().join("missing.yaml");
        fs::write(&existing, "node:\n  id: 9\n").unwrap();

        let paths = vec![missing, existing.clone()];
        let (config, loaded) = Config::load_from_paths(&paths).unwrap();

        assert_eq!(loaded, vec![existing]);
        assert_eq!(config.node.id, Some(NodeId::new(9)));
    }

    #[test]
    fn test_load_file_parse_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.yaml");
        fs::write(&path, "buffer: [not, a, map]\n").unwrap();

        assert!(matches!(
            Config::load_file(&path),
            Err(ConfigError::ParseYaml { .. })
        ));
    }

    #[test]
    fn test_search_paths_includes_expected() {
        let paths = Config::search_paths();
        assert!(paths.iter().any(|p| p.ends_with("qkdnet.yaml")));
        assert!(paths
            .iter()
            .any(|p| p.starts_with("/etc/qkdnet") && p.ends_with("qkdnet.yaml")));
    }

    #[test]
    fn test_to_yaml_roundtrip_sections() {
        let mut config = Config::for_node(NodeId::new(4));
        config.links.push(LinkConfig::new(NodeId::new(5)));

        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("node:"));
        assert!(yaml.contains("id: 4"));
        assert!(yaml.contains("peer: 5"));

        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }
}
