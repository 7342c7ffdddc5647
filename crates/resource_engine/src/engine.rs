//! Composition root
//!
//! [`ResourceContext`] owns the resource cache and the pool manager for the
//! lifetime of the host application. The host calls [`ResourceContext::initialize`]
//! once its scene exists and [`ResourceContext::shutdown`] when it is torn down;
//! collaborators receive the context (or clones of its handles) explicitly.

use crate::assets::{AssetBackend, PreloadOptions, PreloadRequest, ResourceCache, ResourceError};
use crate::config::ConfigError;
use crate::core::config::ResourceConfig;
use crate::foundation::progress::ProgressFn;
use crate::scene::{PoolError, PoolManager, SceneBackend};
use std::cell::Cell;
use std::rc::Rc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContextState {
    Uninitialized,
    Initializing,
    Ready,
}

/// Context lifecycle errors
#[derive(Debug, Error)]
pub enum ContextError {
    /// `initialize` called while initializing or after success
    #[error("Resource context is already initialized")]
    AlreadyInitialized,

    /// Operation requires a successful `initialize`
    #[error("Resource context is not initialized")]
    NotInitialized,

    /// Startup preload failed
    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    /// Startup prewarm failed
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// The configuration is unusable
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Resource context
///
/// Explicitly constructed replacement for process-wide cache and pool
/// singletons.
pub struct ResourceContext<B: AssetBackend, S: SceneBackend> {
    config: ResourceConfig,
    cache: ResourceCache<B>,
    pools: PoolManager<B, S>,
    state: Cell<ContextState>,
}

impl<B: AssetBackend, S: SceneBackend> ResourceContext<B, S> {
    /// Wire a cache and a pool manager over the given backends
    pub fn new(config: ResourceConfig, assets: Rc<B>, scene: Rc<S>) -> Self {
        let cache = ResourceCache::new(assets, config.cache.clone());
        let pools = PoolManager::new(cache.clone(), scene, config.pools.clone());
        Self {
            config,
            cache,
            pools,
            state: Cell::new(ContextState::Uninitialized),
        }
    }

    /// Prepare the subsystems for use
    ///
    /// Creates the pool holding root, preloads the configured prefab list
    /// (reporting cumulative progress) and prewarms the configured pools. A
    /// second call while initializing or after success is refused. On failure
    /// the context goes back to uninitialized and may be initialized again.
    pub async fn initialize(&self, on_progress: Option<ProgressFn>) -> Result<(), ContextError> {
        if self.state.get() != ContextState::Uninitialized {
            log::warn!("Ignoring repeated ResourceContext initialize");
            return Err(ContextError::AlreadyInitialized);
        }
        self.state.set(ContextState::Initializing);

        match self.run_initialize(on_progress).await {
            Ok(()) => {
                self.state.set(ContextState::Ready);
                log::info!("ResourceContext initialized");
                Ok(())
            }
            Err(err) => {
                self.state.set(ContextState::Uninitialized);
                log::warn!("ResourceContext initialization failed: {}", err);
                Err(err)
            }
        }
    }

    async fn run_initialize(&self, on_progress: Option<ProgressFn>) -> Result<(), ContextError> {
        self.config.validate()?;
        self.pools.attach_holding_root();

        let preload = &self.config.preload;
        if !preload.paths.is_empty() {
            let requests: Vec<PreloadRequest> = preload.paths.iter().map(PreloadRequest::prefab).collect();
            log::info!("Preloading {} prefab(s) from '{}'", requests.len(), preload.bundle);
            let options = PreloadOptions {
                on_progress,
                ..PreloadOptions::default()
            };
            self.cache.preload_list(&preload.bundle, &requests, options).await?;
        }

        for entry in &self.config.pools.prewarm {
            self.pools.prewarm_asset(&entry.bundle, &entry.path, entry.count).await?;
        }

        Ok(())
    }

    /// Tear everything down: destroy pooled instances and the holding root,
    /// then evict every cached asset
    pub fn shutdown(&self) -> Result<(), ContextError> {
        if self.state.get() != ContextState::Ready {
            return Err(ContextError::NotInitialized);
        }

        self.pools.shutdown();
        let released = self.cache.release_all();
        self.state.set(ContextState::Uninitialized);
        log::info!("ResourceContext shut down ({} cached asset(s) released)", released);
        Ok(())
    }

    /// Whether `initialize` has completed successfully
    pub fn is_initialized(&self) -> bool {
        self.state.get() == ContextState::Ready
    }

    /// Resource cache
    pub fn cache(&self) -> &ResourceCache<B> {
        &self.cache
    }

    /// Pool manager
    pub fn pools(&self) -> &PoolManager<B, S> {
        &self.pools
    }

    /// Configuration the context was built with
    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }
}
