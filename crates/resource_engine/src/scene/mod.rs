//! Scene object pooling
//!
//! Instantiated templates are recycled through keyed pools instead of being
//! destroyed and recreated. Every pooled instance carries a [`PoolTag`]
//! naming its pool, so despawn can route it back without any lookup on the
//! caller's side.

pub mod pool_manager;

pub use pool_manager::{DespawnOptions, Despawned, PoolManager, PoolStats};

use crate::assets::{CacheKey, ResourceError};
use crate::foundation::collections::InstanceId;
use std::fmt;
use thiserror::Error;

/// Identity of one object pool
///
/// Either derived from a template as `"{bundle}::{path}"` or supplied by the
/// caller for pools not backed by a single template. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolKey(String);

impl PoolKey {
    /// Validate a caller-supplied key (trimmed, non-empty)
    pub fn new(key: &str) -> Result<Self, PoolError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(PoolError::InvalidPoolKey);
        }
        Ok(Self(key.to_string()))
    }

    /// Key of the pool backing a template
    pub fn for_template(key: &CacheKey) -> Self {
        Self(format!("{}::{}", key.bundle, key.path))
    }

    /// Key text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata attached to every instance that passed through a pool
///
/// An instance without a tag, or with an empty key, is unpooled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolTag {
    /// Owning pool; empty means unpooled
    pub pool_key: String,
}

impl PoolTag {
    /// Tag for `key`
    pub fn new(key: &PoolKey) -> Self {
        Self {
            pool_key: key.as_str().to_string(),
        }
    }

    /// Owning pool, if the tag names one
    pub fn pool_key(&self) -> Option<PoolKey> {
        PoolKey::new(&self.pool_key).ok()
    }
}

/// Instance lifecycle provider
///
/// The pool manager only activates, parents, tags and destroys instances
/// through this trait; it never inspects them otherwise. Implementations use
/// interior mutability and may re-enter the pool manager from the hooks.
pub trait SceneBackend: 'static {
    /// Create an empty node (used for the pool holding root)
    fn create_node(&self, name: &str) -> InstanceId;

    /// Whether the instance still exists
    fn is_valid(&self, instance: InstanceId) -> bool;

    /// Activate or deactivate
    fn set_active(&self, instance: InstanceId, active: bool);

    /// Re-parent; `None` detaches
    fn set_parent(&self, instance: InstanceId, parent: Option<InstanceId>);

    /// Attach a pool tag, overwriting any existing one
    fn attach_tag(&self, instance: InstanceId, tag: PoolTag);

    /// Current pool tag
    fn tag(&self, instance: InstanceId) -> Option<PoolTag>;

    /// Destroy the instance and its children
    fn destroy(&self, instance: InstanceId);

    /// Spawn hook, called last in spawn
    fn on_spawned(&self, _instance: InstanceId) {}

    /// Despawn hook, called first in despawn of a pooled instance
    fn on_despawned(&self, _instance: InstanceId) {}
}

/// Pool manager errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// Empty pool key
    #[error("Pool key is empty")]
    InvalidPoolKey,

    /// The instance is already sitting in its pool
    #[error("Instance {instance:?} is already pooled in '{key}'")]
    AlreadyPooled {
        /// Offending instance
        instance: InstanceId,
        /// Pool it is in
        key: PoolKey,
    },

    /// Template resolution failed
    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetType;

    #[test]
    fn test_pool_key_validation() {
        assert_eq!(PoolKey::new("  bullets ").unwrap().as_str(), "bullets");
        assert_eq!(PoolKey::new(""), Err(PoolError::InvalidPoolKey));
        assert_eq!(PoolKey::new("   "), Err(PoolError::InvalidPoolKey));
    }

    #[test]
    fn test_pool_key_for_template() {
        let key = CacheKey::new("prefab", "map/A", AssetType::PREFAB).unwrap();
        assert_eq!(PoolKey::for_template(&key).to_string(), "prefab::map/A");
    }

    #[test]
    fn test_empty_tag_is_unpooled() {
        assert_eq!(PoolTag::default().pool_key(), None);
        let key = PoolKey::new("fx").unwrap();
        assert_eq!(PoolTag::new(&key).pool_key(), Some(key));
    }
}
