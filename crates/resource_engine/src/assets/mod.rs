//! Asset management system
//!
//! Resources are addressed by `(bundle, path, type)` and loaded through an
//! [`AssetBackend`]. [`ResourceCache`] owns the loaded bundles and assets,
//! deduplicates concurrent loads of the same key and counts references.

pub mod backend;
pub mod in_flight;
pub mod resource_cache;

pub use backend::{AssetBackend, BackendError};
pub use resource_cache::{CacheStats, PreloadOptions, ResourceCache};

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

/// Type tag distinguishing resources that share a path
///
/// Two loads of the same path with different tags are different cache
/// entries. Tags are plain names so they can appear in config files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetType(Cow<'static, str>);

impl AssetType {
    /// Instantiable scene template
    pub const PREFAB: AssetType = AssetType::from_static("Prefab");
    /// Texture
    pub const TEXTURE: AssetType = AssetType::from_static("Texture2D");
    /// Audio clip
    pub const AUDIO: AssetType = AssetType::from_static("AudioClip");
    /// Plain text
    pub const TEXT: AssetType = AssetType::from_static("TextAsset");
    /// Untyped asset, used when a preload request names no type
    pub const ASSET: AssetType = AssetType::from_static("Asset");

    /// Tag from a static name
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Tag from a runtime name
    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    /// Tag name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Asset trait for loadable resources
///
/// Backends hand out `Rc<dyn Any>` values; the cache downcasts them to the
/// requested `Self` on the way out.
pub trait Asset: Any {
    /// Tag this type is cached under
    const ASSET_TYPE: AssetType;
}

/// Identity of one cached asset: `(bundle, path, type)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Bundle name
    pub bundle: String,
    /// Path inside the bundle, without extension
    pub path: String,
    /// Type tag
    pub asset_type: AssetType,
}

impl CacheKey {
    /// Build a key, trimming names and rejecting empty ones
    pub fn new(bundle: &str, path: &str, asset_type: AssetType) -> Result<Self, ResourceError> {
        let (bundle, path) = (bundle.trim(), path.trim());
        if bundle.is_empty() || path.is_empty() {
            return Err(ResourceError::InvalidBundleOrPath {
                bundle: bundle.to_string(),
                path: path.to_string(),
            });
        }
        Ok(Self {
            bundle: bundle.to_string(),
            path: path.to_string(),
            asset_type,
        })
    }

    /// Key for asset type `T`
    pub fn of<T: Asset>(bundle: &str, path: &str) -> Result<Self, ResourceError> {
        Self::new(bundle, path, T::ASSET_TYPE)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}::{}", self.bundle, self.path, self.asset_type)
    }
}

/// One entry of a preload list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PreloadRequest {
    /// Template; cached under the backend's template type
    Prefab {
        /// Path inside the bundle
        path: String,
    },
    /// Any other asset
    Asset {
        /// Path inside the bundle
        path: String,
        /// Type tag; [`AssetType::ASSET`] when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        asset_type: Option<AssetType>,
    },
}

impl PreloadRequest {
    /// Prefab request
    pub fn prefab(path: impl Into<String>) -> Self {
        Self::Prefab { path: path.into() }
    }

    /// Typed asset request
    pub fn asset(path: impl Into<String>, asset_type: AssetType) -> Self {
        Self::Asset {
            path: path.into(),
            asset_type: Some(asset_type),
        }
    }

    /// Requested path
    pub fn path(&self) -> &str {
        match self {
            Self::Prefab { path } | Self::Asset { path, .. } => path,
        }
    }

    /// Resolve the type tag, given the backend's template type
    pub fn resolve_type(&self, template_type: &AssetType) -> AssetType {
        match self {
            Self::Prefab { .. } => template_type.clone(),
            Self::Asset { asset_type, .. } => asset_type.clone().unwrap_or(AssetType::ASSET),
        }
    }
}

/// Resource cache errors
///
/// `Clone` because one failed load is delivered to every caller that joined it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    /// The backend could not load a bundle
    #[error("Failed to load bundle '{bundle}': {reason}")]
    BundleLoadFailed {
        /// Bundle name
        bundle: String,
        /// Backend failure
        reason: BackendError,
    },

    /// The backend could not load an asset
    #[error("Failed to load asset {bundle}/{path} ({asset_type}): {reason}")]
    AssetLoadFailed {
        /// Bundle name
        bundle: String,
        /// Asset path
        path: String,
        /// Requested type
        asset_type: AssetType,
        /// Backend failure
        reason: BackendError,
    },

    /// A preload type-group failed; later groups were not attempted
    #[error("Failed to preload {} {asset_type} asset(s) from '{bundle}': {reason}", .paths.len())]
    PreloadFailed {
        /// Bundle name
        bundle: String,
        /// Type of the failed group
        asset_type: AssetType,
        /// Paths of the failed group
        paths: Vec<String>,
        /// Backend failure
        reason: BackendError,
    },

    /// Empty bundle name or path
    #[error("Invalid bundle or path: bundle='{bundle}', path='{path}'")]
    InvalidBundleOrPath {
        /// Bundle name as given (trimmed)
        bundle: String,
        /// Path as given (trimmed)
        path: String,
    },

    /// The loaded value is not of the requested Rust type
    #[error("Asset {key} does not have the requested type")]
    TypeMismatch {
        /// Offending key, formatted
        key: String,
    },

    /// The pending load was dropped before it settled
    #[error("Load of {key} was abandoned before completion")]
    LoadAbandoned {
        /// Offending key, formatted
        key: String,
    },
}

/// Downcast a cached value to the requested asset type
pub(crate) fn downcast_asset<T: Asset>(value: std::rc::Rc<dyn Any>, key: &CacheKey) -> Result<std::rc::Rc<T>, ResourceError> {
    value.downcast::<T>().map_err(|_| ResourceError::TypeMismatch {
        key: key.to_string(),
    })
}
