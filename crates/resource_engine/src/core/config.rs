//! # Resource Configuration
//!
//! Settings for the resource cache, the object pools and the startup preload
//! list. Every section is `#[serde(default)]`, so a config file only needs to
//! mention what it changes.
//!
//! ```toml
//! [cache]
//! yield_between_groups = true
//!
//! [pools]
//! holding_root_name = "__PoolRoot__"
//!
//! [[pools.prewarm]]
//! bundle = "prefab"
//! path = "fx/Hit"
//! count = 8
//!
//! [preload]
//! bundle = "prefab"
//! paths = ["map/Map_S01_GreenPlanet_01"]
//! ```

use serde::{Serialize, Deserialize};

// Re-export from the config module for convenience
pub use crate::config::{Config, ConfigError};

/// Bundle used for prefabs when nothing else is configured
pub const DEFAULT_PREFAB_BUNDLE: &str = "prefab";

/// Name of the inactive node that parents despawned instances
pub const DEFAULT_HOLDING_ROOT_NAME: &str = "__PoolRoot__";

/// # Cache Configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Yield to the scheduler after every preload type-group
    pub yield_between_groups: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            yield_between_groups: true,
        }
    }
}

/// One pool to fill ahead of time during initialization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrewarmEntry {
    /// Bundle holding the template
    pub bundle: String,
    /// Template path inside the bundle
    pub path: String,
    /// Number of instances to create
    pub count: usize,
}

/// # Pool Configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Name given to the holding root node
    pub holding_root_name: String,
    /// Default for `DespawnOptions::destroy_if_unpooled`
    pub destroy_unpooled_on_despawn: bool,
    /// Pools to prewarm on initialize
    pub prewarm: Vec<PrewarmEntry>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            holding_root_name: DEFAULT_HOLDING_ROOT_NAME.to_string(),
            destroy_unpooled_on_despawn: true,
            prewarm: Vec::new(),
        }
    }
}

/// # Preload Configuration
///
/// Prefabs warmed before the first scene needs them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadConfig {
    /// Bundle the prefab paths live in
    pub bundle: String,
    /// Prefab paths, without extension
    pub paths: Vec<String>,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            bundle: DEFAULT_PREFAB_BUNDLE.to_string(),
            paths: Vec::new(),
        }
    }
}

/// # Resource Configuration
///
/// Top-level configuration handed to [`crate::ResourceContext`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// Resource cache settings
    pub cache: CacheConfig,
    /// Object pool settings
    pub pools: PoolConfig,
    /// Startup preload list
    pub preload: PreloadConfig,
}

impl Config for ResourceConfig {}

impl ResourceConfig {
    /// Set the startup preload list
    pub fn with_preload(mut self, bundle: impl Into<String>, paths: Vec<String>) -> Self {
        self.preload = PreloadConfig {
            bundle: bundle.into(),
            paths,
        };
        self
    }

    /// Add a pool to prewarm on initialize
    pub fn with_prewarm(mut self, bundle: impl Into<String>, path: impl Into<String>, count: usize) -> Self {
        self.pools.prewarm.push(PrewarmEntry {
            bundle: bundle.into(),
            path: path.into(),
            count,
        });
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pools.holding_root_name.trim().is_empty() {
            return Err(ConfigError::Invalid("Holding root name cannot be empty".to_string()));
        }

        if !self.preload.paths.is_empty() && self.preload.bundle.trim().is_empty() {
            return Err(ConfigError::Invalid("Preload bundle cannot be empty".to_string()));
        }

        if let Some(index) = self.preload.paths.iter().position(|p| p.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("Preload path #{} is empty", index)));
        }

        for entry in &self.pools.prewarm {
            if entry.bundle.trim().is_empty() || entry.path.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "Prewarm entry needs both bundle and path (got '{}', '{}')",
                    entry.bundle, entry.path
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ResourceConfig::default();
        assert!(config.cache.yield_between_groups);
        assert!(config.pools.destroy_unpooled_on_despawn);
        assert_eq!(config.pools.holding_root_name, "__PoolRoot__");
        assert_eq!(config.preload.bundle, "prefab");
        assert!(config.preload.paths.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let text = r#"
            [preload]
            paths = ["map/A", "map/B"]

            [[pools.prewarm]]
            bundle = "prefab"
            path = "fx/Hit"
            count = 4
        "#;

        let config = ResourceConfig::from_str_with_format(text, "resources.toml").unwrap();

        assert_eq!(config.preload.bundle, "prefab");
        assert_eq!(config.preload.paths, vec!["map/A".to_string(), "map/B".to_string()]);
        assert_eq!(config.pools.prewarm.len(), 1);
        assert_eq!(config.pools.prewarm[0].count, 4);
        assert!(config.cache.yield_between_groups);
    }

    #[test]
    fn test_ron_format() {
        let text = "(cache: (yield_between_groups: false))";
        let config = ResourceConfig::from_str_with_format(text, "resources.ron").unwrap();
        assert!(!config.cache.yield_between_groups);
        assert_eq!(config.pools, PoolConfig::default());
    }

    #[test]
    fn test_unsupported_format() {
        let result = ResourceConfig::from_str_with_format("{}", "resources.json");
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_validate_rejects_empty_preload_path() {
        let config = ResourceConfig::default().with_preload("prefab", vec!["map/A".into(), "  ".into()]);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_incomplete_prewarm() {
        let config = ResourceConfig::default().with_prewarm("", "fx/Hit", 2);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_toml_roundtrip_through_file() {
        let path = std::env::temp_dir().join(format!("resource_engine_config_{}.toml", std::process::id()));
        let path = path.to_string_lossy().to_string();
        let config = ResourceConfig::default()
            .with_preload("maps", vec!["map/A".into()])
            .with_prewarm("prefab", "fx/Hit", 3);

        config.save_to_file(&path).unwrap();
        let loaded = ResourceConfig::load_from_file(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded, config);
    }
}
