//! Asset backend abstraction
//!
//! The template provider the cache is built on. Bundle transport, typed asset
//! materialization and instantiation all live behind this trait; the cache
//! consumes these five operations and nothing else from the engine layer.
//!
//! # Threading
//! Single-threaded by design. Futures are `?Send` and implementations are
//! expected to use interior mutability (`RefCell`/`Cell`) for their state.

use super::{Asset, AssetType};
use crate::foundation::collections::InstanceId;
use async_trait::async_trait;
use std::any::Any;
use std::rc::Rc;
use thiserror::Error;

/// Failure reported by a backend operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BackendError {
    /// Human readable cause
    pub message: String,
}

impl BackendError {
    /// Create a backend error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Template provider used by [`super::ResourceCache`] and the pool manager
#[async_trait(?Send)]
pub trait AssetBackend: 'static {
    /// Loaded bundle handle
    type Bundle: Clone + 'static;

    /// Instantiable template type (the "prefab")
    type Template: Asset;

    /// Load a bundle by name
    async fn load_bundle(&self, name: &str) -> Result<Self::Bundle, BackendError>;

    /// Materialize one typed resource from a bundle
    ///
    /// `progress` receives raw `(finished, total)` ticks from the transport.
    async fn load_typed(
        &self,
        bundle: &Self::Bundle,
        path: &str,
        asset_type: &AssetType,
        progress: Option<&dyn Fn(usize, usize)>,
    ) -> Result<Rc<dyn Any>, BackendError>;

    /// Warm the loading pipeline for a batch of same-typed paths
    async fn preload_batch(
        &self,
        bundle: &Self::Bundle,
        paths: &[String],
        asset_type: &AssetType,
        progress: Option<&dyn Fn(usize, usize)>,
    ) -> Result<(), BackendError>;

    /// Create a new scene instance from a template
    fn instantiate(&self, template: &Self::Template) -> InstanceId;

    /// Drop a bundle from the underlying asset system
    fn remove_bundle(&self, bundle: &Self::Bundle);
}
