//! # Resource Engine
//!
//! Bundle-based resource loading and scene object pooling for a
//! single-threaded game client.
//!
//! ## Features
//!
//! - **Resource Cache**: typed loads addressed by `(bundle, path, type)`, with
//!   concurrent requests for the same key sharing one underlying load
//! - **Reference Counting**: every handed-out value is counted until released
//! - **Batched Preloading**: type-grouped warm-up with aggregated progress
//! - **Object Pools**: instances recycled through keyed pools instead of being
//!   destroyed and recreated
//! - **Pluggable Backends**: asset delivery and scene lifecycle behind traits
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use resource_engine::prelude::*;
//! use std::rc::Rc;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = Rc::new(MemoryBackend::new());
//!     backend.register_template("prefab", "map/A");
//!
//!     let config = ResourceConfig::default().with_preload("prefab", vec!["map/A".into()]);
//!     let context = ResourceContext::new(config, Rc::clone(&backend), backend);
//!
//!     block_on_local(async {
//!         context.initialize(None).await?;
//!         let map = context.pools().spawn("prefab", "map/A", None, None).await?;
//!         context.pools().despawn(map)?;
//!         context.shutdown()?;
//!         Ok::<_, Box<dyn std::error::Error>>(())
//!     })?
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc, clippy::future_not_send)]

// Core configuration
pub mod core;

pub mod foundation;
pub mod config;
pub mod assets;
pub mod scene;
pub mod backend;

mod engine;

pub use engine::{ContextError, ResourceContext};

/// Common imports for resource engine users
pub mod prelude {
    pub use crate::{
        ContextError, ResourceContext,
        foundation::{
            collections::InstanceId,
            progress::ProgressFn,
            runtime::block_on_local,
        },
        assets::{
            Asset, AssetBackend, AssetType, BackendError, CacheKey, PreloadOptions, PreloadRequest,
            ResourceCache, ResourceError,
        },
        scene::{DespawnOptions, Despawned, PoolError, PoolKey, PoolManager, PoolTag, SceneBackend},
        backend::memory::{MemoryBackend, MemoryTemplate},
        core::config::{Config, ConfigError, ResourceConfig},
    };
}
