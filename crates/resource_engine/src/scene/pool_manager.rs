//! Pool Manager - keyed recycling of instantiated templates
//!
//! Coordinates one free-list per [`PoolKey`]. Spawning pops a free instance
//! (or instantiates the template on a miss), despawning pushes the instance
//! back onto the pool named by its [`PoolTag`].
//!
//! ```text
//! spawn(bundle, path)
//!    └── cache.load_prefab ──► spawn_from_template("{bundle}::{path}")
//!                                 ├── pop free instance (skip stale)
//!                                 └── or backend.instantiate(template)
//!                               tag → activate → parent → on_spawned
//!
//! despawn(instance)
//!    ├── untagged → destroy, or detach + deactivate
//!    └── tagged   → on_despawned → detach → deactivate → holding root → push
//! ```
//!
//! Free instances are parented under an inactive holding root so they stay out
//! of the live hierarchy. A pool created by [`PoolManager::spawn`] or
//! [`PoolManager::prewarm_asset`] owns exactly one cache reference to its
//! template, returned when the pool is cleared. No `RefCell` borrow is held
//! while a scene hook runs.

use super::{PoolError, PoolKey, PoolTag, SceneBackend};
use crate::assets::{AssetBackend, CacheKey, ResourceCache};
use crate::core::config::PoolConfig;
use crate::foundation::collections::InstanceId;
use crate::foundation::progress::ProgressFn;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// Options for [`PoolManager::despawn_with`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DespawnOptions {
    /// Destroy untagged instances instead of detaching them
    pub destroy_if_unpooled: bool,
}

impl Default for DespawnOptions {
    fn default() -> Self {
        Self {
            destroy_if_unpooled: true,
        }
    }
}

/// What despawn did with an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Despawned {
    /// Returned to the named pool
    Pooled(PoolKey),
    /// Unpooled and destroyed
    Destroyed,
    /// Unpooled, detached and deactivated
    Detached,
    /// The instance no longer exists
    Ignored,
}

/// Pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Successful spawns
    pub spawned: u64,
    /// Spawns served from a pool
    pub reused: u64,
    /// Instances created from templates (spawn misses, prewarm, instantiate)
    pub instantiated: u64,
    /// Instances pushed back onto a pool
    pub despawned: u64,
    /// Instances destroyed by despawn or clear
    pub destroyed: u64,
    /// Instances created by prewarm
    pub prewarmed: u64,
}

/// Free instances of one key
#[derive(Default)]
struct Pool {
    /// Free stack, most recently despawned last
    free: Vec<InstanceId>,
    /// Same instances as `free`, for membership checks
    members: HashSet<InstanceId>,
    /// Template reference held for the pool's lifetime
    template: Option<CacheKey>,
}

impl Pool {
    fn push(&mut self, instance: InstanceId) {
        if self.members.insert(instance) {
            self.free.push(instance);
        }
    }

    fn pop(&mut self) -> Option<InstanceId> {
        let instance = self.free.pop()?;
        self.members.remove(&instance);
        Some(instance)
    }

    fn contains(&self, instance: InstanceId) -> bool {
        self.members.contains(&instance)
    }
}

struct PoolInner<B: AssetBackend, S: SceneBackend> {
    cache: ResourceCache<B>,
    scene: Rc<S>,
    config: PoolConfig,
    holding_root: Cell<Option<InstanceId>>,
    pools: RefCell<HashMap<PoolKey, Pool>>,
    stats: Cell<PoolStats>,
}

/// Pool Manager
///
/// Cheap to clone; clones share the same pools. Scene hooks may call back
/// into any clone.
pub struct PoolManager<B: AssetBackend, S: SceneBackend> {
    inner: Rc<PoolInner<B, S>>,
}

impl<B: AssetBackend, S: SceneBackend> Clone for PoolManager<B, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<B: AssetBackend, S: SceneBackend> PoolManager<B, S> {
    /// Create a pool manager resolving templates through `cache`
    pub fn new(cache: ResourceCache<B>, scene: Rc<S>, config: PoolConfig) -> Self {
        log::info!("Creating PoolManager (holding root '{}')", config.holding_root_name);
        Self {
            inner: Rc::new(PoolInner {
                cache,
                scene,
                config,
                holding_root: Cell::new(None),
                pools: RefCell::new(HashMap::new()),
                stats: Cell::new(PoolStats::default()),
            }),
        }
    }

    /// Cache templates are resolved through
    pub fn cache(&self) -> &ResourceCache<B> {
        &self.inner.cache
    }

    /// Scene backend instances live in
    pub fn scene(&self) -> &Rc<S> {
        &self.inner.scene
    }

    /// Create the holding root if it does not exist (or was destroyed)
    pub fn attach_holding_root(&self) -> InstanceId {
        if let Some(root) = self.inner.holding_root.get() {
            if self.inner.scene.is_valid(root) {
                return root;
            }
        }

        let root = self.inner.scene.create_node(&self.inner.config.holding_root_name);
        self.inner.scene.set_active(root, false);
        self.inner.holding_root.set(Some(root));
        log::debug!("Created pool holding root {:?}", root);
        root
    }

    /// Current holding root, if created
    pub fn holding_root(&self) -> Option<InstanceId> {
        self.inner.holding_root.get()
    }

    /// Load the template `(bundle, path)` and spawn it from pool `"{bundle}::{path}"`
    pub async fn spawn(
        &self,
        bundle_name: &str,
        path: &str,
        parent: Option<InstanceId>,
        on_progress: Option<ProgressFn>,
    ) -> Result<InstanceId, PoolError> {
        let key = CacheKey::of::<B::Template>(bundle_name, path)?;
        let template = self.inner.cache.load_prefab(&key.bundle, &key.path, on_progress).await?;
        let pool_key = PoolKey::for_template(&key);
        self.hold_template(&pool_key, key);
        Ok(self.spawn_keyed(pool_key, &template, parent))
    }

    /// Spawn from an already resolved template
    ///
    /// Reuses a free instance of `pool_key` when there is one, otherwise
    /// instantiates `template`. The instance comes back tagged, active and
    /// parented to `parent` (detached when `None`).
    pub fn spawn_from_template(
        &self,
        pool_key: &str,
        template: &B::Template,
        parent: Option<InstanceId>,
    ) -> Result<InstanceId, PoolError> {
        let key = PoolKey::new(pool_key)?;
        Ok(self.spawn_keyed(key, template, parent))
    }

    fn spawn_keyed(&self, key: PoolKey, template: &B::Template, parent: Option<InstanceId>) -> InstanceId {
        let scene = &self.inner.scene;

        let reused = loop {
            let candidate = self.inner.pools.borrow_mut().entry(key.clone()).or_default().pop();
            match candidate {
                Some(instance) if scene.is_valid(instance) => break Some(instance),
                Some(instance) => log::warn!("Dropping stale pooled instance {:?} from '{}'", instance, key),
                None => break None,
            }
        };

        let instance = match reused {
            Some(instance) => {
                self.bump(|stats| stats.reused += 1);
                instance
            }
            None => {
                self.bump(|stats| stats.instantiated += 1);
                self.inner.cache.backend().instantiate(template)
            }
        };

        scene.attach_tag(instance, PoolTag::new(&key));
        scene.set_active(instance, true);
        scene.set_parent(instance, parent);
        scene.on_spawned(instance);

        self.bump(|stats| stats.spawned += 1);
        log::debug!(
            "Spawned {:?} from '{}' ({})",
            instance,
            key,
            if reused.is_some() { "reused" } else { "new" }
        );
        instance
    }

    /// Load a template and create a fresh unpooled instance
    ///
    /// The instance carries no tag, so despawn destroys it rather than
    /// recycling it.
    pub async fn instantiate(
        &self,
        bundle_name: &str,
        path: &str,
        parent: Option<InstanceId>,
    ) -> Result<InstanceId, PoolError> {
        let template = self.inner.cache.load_prefab(bundle_name, path, None).await?;
        let instance = self.inner.cache.backend().instantiate(&template);
        self.bump(|stats| stats.instantiated += 1);

        let scene = &self.inner.scene;
        scene.set_active(instance, true);
        if parent.is_some() {
            scene.set_parent(instance, parent);
        }
        Ok(instance)
    }

    /// Despawn with the configured default options
    pub fn despawn(&self, instance: InstanceId) -> Result<Despawned, PoolError> {
        self.despawn_with(
            instance,
            DespawnOptions {
                destroy_if_unpooled: self.inner.config.destroy_unpooled_on_despawn,
            },
        )
    }

    /// Return an instance to its pool, or dispose of an unpooled one
    ///
    /// Despawning an instance that is already sitting in its pool is a caller
    /// error and returns [`PoolError::AlreadyPooled`].
    pub fn despawn_with(&self, instance: InstanceId, options: DespawnOptions) -> Result<Despawned, PoolError> {
        let scene = &self.inner.scene;
        if !scene.is_valid(instance) {
            log::debug!("Ignoring despawn of invalid instance {:?}", instance);
            return Ok(Despawned::Ignored);
        }

        let Some(key) = scene.tag(instance).and_then(|tag| tag.pool_key()) else {
            if options.destroy_if_unpooled {
                scene.destroy(instance);
                self.bump(|stats| stats.destroyed += 1);
                log::debug!("Destroyed unpooled instance {:?}", instance);
                return Ok(Despawned::Destroyed);
            }
            scene.set_parent(instance, None);
            scene.set_active(instance, false);
            log::debug!("Detached unpooled instance {:?}", instance);
            return Ok(Despawned::Detached);
        };

        if self.is_pooled(&key, instance) {
            log::warn!("Instance {:?} despawned twice into '{}'", instance, key);
            return Err(PoolError::AlreadyPooled { instance, key });
        }

        scene.on_despawned(instance);
        scene.set_parent(instance, None);
        scene.set_active(instance, false);
        let root = self.attach_holding_root();
        scene.set_parent(instance, Some(root));

        self.inner.pools.borrow_mut().entry(key.clone()).or_default().push(instance);
        self.bump(|stats| stats.despawned += 1);
        log::debug!("Despawned {:?} into '{}'", instance, key);
        Ok(Despawned::Pooled(key))
    }

    /// Fill `pool_key` with `count` inactive, tagged instances
    ///
    /// Spawn hooks are not invoked. Returns the number created.
    pub fn prewarm(&self, pool_key: &str, template: &B::Template, count: usize) -> Result<usize, PoolError> {
        let key = PoolKey::new(pool_key)?;
        Ok(self.prewarm_keyed(key, template, count))
    }

    fn prewarm_keyed(&self, key: PoolKey, template: &B::Template, count: usize) -> usize {
        if count == 0 {
            return 0;
        }

        let scene = &self.inner.scene;
        let root = self.attach_holding_root();
        let mut created = Vec::with_capacity(count);
        for _ in 0..count {
            let instance = self.inner.cache.backend().instantiate(template);
            scene.attach_tag(instance, PoolTag::new(&key));
            scene.set_active(instance, false);
            scene.set_parent(instance, Some(root));
            created.push(instance);
        }

        {
            let mut pools = self.inner.pools.borrow_mut();
            let pool = pools.entry(key.clone()).or_default();
            for instance in created {
                pool.push(instance);
            }
        }
        self.bump(|stats| {
            stats.instantiated += count as u64;
            stats.prewarmed += count as u64;
        });
        log::debug!("Prewarmed {} instance(s) into '{}'", count, key);
        count
    }

    /// Load the template `(bundle, path)` and prewarm its pool
    pub async fn prewarm_asset(&self, bundle_name: &str, path: &str, count: usize) -> Result<usize, PoolError> {
        let key = CacheKey::of::<B::Template>(bundle_name, path)?;
        let template = self.inner.cache.load_prefab(&key.bundle, &key.path, None).await?;
        if count == 0 {
            self.inner.cache.release(&key);
            return Ok(0);
        }
        let pool_key = PoolKey::for_template(&key);
        self.hold_template(&pool_key, key);
        Ok(self.prewarm_keyed(pool_key, &template, count))
    }

    /// Keep the reference just taken on `template` if the pool has none yet
    fn hold_template(&self, pool_key: &PoolKey, template: CacheKey) {
        let surplus = {
            let mut pools = self.inner.pools.borrow_mut();
            let pool = pools.entry(pool_key.clone()).or_default();
            match pool.template {
                Some(_) => Some(template),
                None => {
                    pool.template = Some(template);
                    None
                }
            }
        };
        if let Some(template) = surplus {
            self.inner.cache.release(&template);
        }
    }

    /// Remove one pool
    ///
    /// With `destroy` the pooled instances are destroyed. Otherwise they are
    /// detached from the holding root and left inactive and tagged. Either
    /// way the removed instances are returned and the next spawn for the key
    /// starts from an empty pool.
    pub fn clear(&self, pool_key: &str, destroy: bool) -> Result<Vec<InstanceId>, PoolError> {
        let key = PoolKey::new(pool_key)?;
        let Some(pool) = self.inner.pools.borrow_mut().remove(&key) else {
            return Ok(Vec::new());
        };

        let instances = self.dispose(pool, destroy);
        log::info!(
            "Cleared pool '{}' ({} instance(s) {})",
            key,
            instances.len(),
            if destroy { "destroyed" } else { "detached" }
        );
        Ok(instances)
    }

    /// Remove every pool; see [`Self::clear`]
    pub fn clear_all(&self, destroy: bool) -> Vec<InstanceId> {
        let mut pools: Vec<(PoolKey, Pool)> = self.inner.pools.borrow_mut().drain().collect();
        pools.sort_by(|a, b| a.0.cmp(&b.0));

        let mut removed = Vec::new();
        for (_, pool) in pools {
            removed.extend(self.dispose(pool, destroy));
        }
        if !removed.is_empty() {
            log::info!("Cleared all pools ({} instance(s))", removed.len());
        }
        removed
    }

    /// Destroy or detach a removed pool's instances and drop its template reference
    fn dispose(&self, pool: Pool, destroy: bool) -> Vec<InstanceId> {
        if let Some(template) = &pool.template {
            self.inner.cache.release(template);
        }

        let scene = &self.inner.scene;
        for &instance in &pool.free {
            if !scene.is_valid(instance) {
                continue;
            }
            if destroy {
                scene.destroy(instance);
                self.bump(|stats| stats.destroyed += 1);
            } else {
                scene.set_parent(instance, None);
            }
        }
        pool.free
    }

    /// Clear all pools and destroy the holding root
    pub fn shutdown(&self) {
        self.clear_all(true);
        if let Some(root) = self.inner.holding_root.take() {
            if self.inner.scene.is_valid(root) {
                self.inner.scene.destroy(root);
            }
        }
        log::info!("PoolManager shut down");
    }

    /// Number of pools (including empty ones)
    pub fn pool_count(&self) -> usize {
        self.inner.pools.borrow().len()
    }

    /// Free instances in one pool
    pub fn free_count(&self, pool_key: &str) -> usize {
        PoolKey::new(pool_key)
            .ok()
            .and_then(|key| self.inner.pools.borrow().get(&key).map(|pool| pool.free.len()))
            .unwrap_or(0)
    }

    /// Snapshot of the pool counters
    pub fn stats(&self) -> PoolStats {
        self.inner.stats.get()
    }

    fn is_pooled(&self, key: &PoolKey, instance: InstanceId) -> bool {
        self.inner
            .pools
            .borrow()
            .get(key)
            .is_some_and(|pool| pool.contains(instance))
    }

    fn bump(&self, update: impl FnOnce(&mut PoolStats)) {
        let mut stats = self.inner.stats.get();
        update(&mut stats);
        self.inner.stats.set(stats);
    }
}
