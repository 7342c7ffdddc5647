//! In-memory backend
//!
//! Implements both [`AssetBackend`] and [`SceneBackend`] over plain maps: a
//! catalog of registered resources per bundle and a slot-map scene graph.
//! Used by headless tools and by the test suites.
//!
//! Besides serving resources it keeps an account of what was asked of it
//! (bundle loads, typed loads and preload batches per key, removed bundles)
//! and a log of scene lifecycle events, and it can be told to fail specific
//! bundles or assets. `latency` is the number of cooperative yields each
//! cold operation takes, so concurrent callers genuinely overlap.

use crate::assets::{Asset, AssetBackend, AssetType, BackendError, CacheKey};
use crate::foundation::collections::{HandleMap, InstanceId};
use crate::foundation::runtime::yield_once;
use crate::scene::{PoolKey, PoolTag, SceneBackend};
use async_trait::async_trait;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// Template served by the in-memory backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryTemplate {
    /// Name given to instances
    pub name: String,
}

impl Asset for MemoryTemplate {
    const ASSET_TYPE: AssetType = AssetType::PREFAB;
}

/// Bundle handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryBundle {
    /// Bundle name
    pub name: String,
    /// Bumped every time the bundle is loaded
    pub generation: u64,
}

/// One recorded `preload_batch` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreloadBatch {
    /// Bundle name
    pub bundle: String,
    /// Type of the batch
    pub asset_type: AssetType,
    /// Requested paths
    pub paths: Vec<String>,
}

/// Scene lifecycle event, in the order it happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SceneEvent {
    /// Node created (instantiate or `create_node`)
    Created(InstanceId),
    /// Pool tag attached or overwritten
    TagAttached(InstanceId, String),
    /// Active flag set
    Activated(InstanceId, bool),
    /// Parent set
    Parented(InstanceId, Option<InstanceId>),
    /// Spawn hook fired
    Spawned(InstanceId),
    /// Despawn hook fired
    Despawned(InstanceId),
    /// Node destroyed
    Destroyed(InstanceId),
}

impl SceneEvent {
    /// Instance the event is about
    pub fn instance(&self) -> InstanceId {
        match self {
            Self::Created(id)
            | Self::TagAttached(id, _)
            | Self::Activated(id, _)
            | Self::Parented(id, _)
            | Self::Spawned(id)
            | Self::Despawned(id)
            | Self::Destroyed(id) => *id,
        }
    }
}

struct SceneNode {
    name: String,
    active: bool,
    parent: Option<InstanceId>,
    tag: Option<PoolTag>,
}

#[derive(Default)]
struct MemoryState {
    catalog: HashMap<String, HashMap<(String, AssetType), Rc<dyn Any>>>,
    primed: HashSet<CacheKey>,
    failing_bundles: HashSet<String>,
    failing_assets: HashSet<(String, String)>,
    bundle_loads: HashMap<String, usize>,
    typed_loads: HashMap<CacheKey, usize>,
    preload_batches: Vec<PreloadBatch>,
    removed_bundles: Vec<String>,
    bundle_generation: u64,
    nodes: HandleMap<SceneNode>,
    events: Vec<SceneEvent>,
}

/// In-memory asset and scene backend
#[derive(Default)]
pub struct MemoryBackend {
    latency: Cell<usize>,
    state: RefCell<MemoryState>,
}

impl MemoryBackend {
    /// Create an empty backend with no latency
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of cooperative yields per cold operation
    pub fn with_latency(self, ticks: usize) -> Self {
        self.latency.set(ticks);
        self
    }

    /// Make an (empty) bundle loadable
    pub fn register_bundle(&self, bundle: &str) {
        self.state.borrow_mut().catalog.entry(bundle.to_string()).or_default();
    }

    /// Register a resource under `(bundle, path, asset_type)`
    pub fn register(&self, bundle: &str, path: &str, asset_type: AssetType, value: Rc<dyn Any>) {
        self.state
            .borrow_mut()
            .catalog
            .entry(bundle.to_string())
            .or_default()
            .insert((path.to_string(), asset_type), value);
    }

    /// Register a typed asset
    pub fn register_asset<T: Asset>(&self, bundle: &str, path: &str, value: T) {
        self.register(bundle, path, T::ASSET_TYPE, Rc::new(value));
    }

    /// Register a template whose instances are named after `path`
    pub fn register_template(&self, bundle: &str, path: &str) {
        self.register_asset(
            bundle,
            path,
            MemoryTemplate {
                name: path.to_string(),
            },
        );
    }

    /// Make every load of `bundle` fail
    pub fn fail_bundle(&self, bundle: &str) {
        self.state.borrow_mut().failing_bundles.insert(bundle.to_string());
    }

    /// Make every load or preload of `bundle/path` fail
    pub fn fail_asset(&self, bundle: &str, path: &str) {
        self.state
            .borrow_mut()
            .failing_assets
            .insert((bundle.to_string(), path.to_string()));
    }

    /// Remove all injected failures
    pub fn clear_failures(&self) {
        let mut state = self.state.borrow_mut();
        state.failing_bundles.clear();
        state.failing_assets.clear();
    }

    /// Number of `load_bundle` calls for `bundle`
    pub fn bundle_load_count(&self, bundle: &str) -> usize {
        self.state.borrow().bundle_loads.get(bundle).copied().unwrap_or(0)
    }

    /// Number of `load_typed` calls for `key`
    pub fn load_typed_count(&self, key: &CacheKey) -> usize {
        self.state.borrow().typed_loads.get(key).copied().unwrap_or(0)
    }

    /// Every `preload_batch` call so far
    pub fn preload_batches(&self) -> Vec<PreloadBatch> {
        self.state.borrow().preload_batches.clone()
    }

    /// Whether a preload has primed `key`
    pub fn is_primed(&self, key: &CacheKey) -> bool {
        self.state.borrow().primed.contains(key)
    }

    /// Names passed to `remove_bundle`, in order
    pub fn removed_bundles(&self) -> Vec<String> {
        self.state.borrow().removed_bundles.clone()
    }

    /// Number of live scene nodes
    pub fn node_count(&self) -> usize {
        self.state.borrow().nodes.len()
    }

    /// Name of a live node
    pub fn name(&self, instance: InstanceId) -> Option<String> {
        self.state.borrow().nodes.get(instance).map(|node| node.name.clone())
    }

    /// Active flag of a live node
    pub fn is_active(&self, instance: InstanceId) -> bool {
        self.state.borrow().nodes.get(instance).is_some_and(|node| node.active)
    }

    /// Parent of a live node
    pub fn parent(&self, instance: InstanceId) -> Option<InstanceId> {
        self.state.borrow().nodes.get(instance).and_then(|node| node.parent)
    }

    /// Live children of `instance`
    pub fn children(&self, instance: InstanceId) -> Vec<InstanceId> {
        self.state
            .borrow()
            .nodes
            .iter()
            .filter(|(_, node)| node.parent == Some(instance))
            .map(|(id, _)| id)
            .collect()
    }

    /// Scene events recorded so far
    pub fn events(&self) -> Vec<SceneEvent> {
        self.state.borrow().events.clone()
    }

    /// Scene events concerning one instance
    pub fn events_for(&self, instance: InstanceId) -> Vec<SceneEvent> {
        self.state
            .borrow()
            .events
            .iter()
            .filter(|event| event.instance() == instance)
            .cloned()
            .collect()
    }

    /// Forget recorded scene events
    pub fn clear_events(&self) {
        self.state.borrow_mut().events.clear();
    }

    async fn simulate_latency(&self, progress: Option<&dyn Fn(usize, usize)>) {
        let ticks = self.latency.get();
        for tick in 0..ticks {
            yield_once().await;
            if let Some(progress) = progress {
                progress(tick + 1, ticks);
            }
        }
    }

    fn record(&self, event: SceneEvent) {
        self.state.borrow_mut().events.push(event);
    }

    fn lookup(&self, bundle: &str, path: &str, asset_type: &AssetType) -> Result<Rc<dyn Any>, BackendError> {
        let state = self.state.borrow();
        if state.failing_assets.contains(&(bundle.to_string(), path.to_string())) {
            return Err(BackendError::new(format!("injected failure for {}/{}", bundle, path)));
        }
        state
            .catalog
            .get(bundle)
            .and_then(|assets| assets.get(&(path.to_string(), asset_type.clone())))
            .cloned()
            .ok_or_else(|| BackendError::new(format!("{}/{} ({}) not found", bundle, path, asset_type)))
    }
}

#[async_trait(?Send)]
impl AssetBackend for MemoryBackend {
    type Bundle = MemoryBundle;
    type Template = MemoryTemplate;

    async fn load_bundle(&self, name: &str) -> Result<MemoryBundle, BackendError> {
        *self.state.borrow_mut().bundle_loads.entry(name.to_string()).or_default() += 1;
        self.simulate_latency(None).await;

        let mut state = self.state.borrow_mut();
        if state.failing_bundles.contains(name) {
            return Err(BackendError::new(format!("injected failure for bundle {}", name)));
        }
        if !state.catalog.contains_key(name) {
            return Err(BackendError::new(format!("bundle {} not found", name)));
        }
        state.bundle_generation += 1;
        Ok(MemoryBundle {
            name: name.to_string(),
            generation: state.bundle_generation,
        })
    }

    async fn load_typed(
        &self,
        bundle: &MemoryBundle,
        path: &str,
        asset_type: &AssetType,
        progress: Option<&dyn Fn(usize, usize)>,
    ) -> Result<Rc<dyn Any>, BackendError> {
        let key = CacheKey {
            bundle: bundle.name.clone(),
            path: path.to_string(),
            asset_type: asset_type.clone(),
        };
        let primed = {
            let mut state = self.state.borrow_mut();
            *state.typed_loads.entry(key.clone()).or_default() += 1;
            state.primed.contains(&key)
        };

        // A preloaded resource skips the transport
        if !primed {
            self.simulate_latency(progress).await;
        }

        let value = self.lookup(&bundle.name, path, asset_type)?;
        if let Some(progress) = progress {
            progress(1, 1);
        }
        Ok(value)
    }

    async fn preload_batch(
        &self,
        bundle: &MemoryBundle,
        paths: &[String],
        asset_type: &AssetType,
        progress: Option<&dyn Fn(usize, usize)>,
    ) -> Result<(), BackendError> {
        self.state.borrow_mut().preload_batches.push(PreloadBatch {
            bundle: bundle.name.clone(),
            asset_type: asset_type.clone(),
            paths: paths.to_vec(),
        });

        for (index, path) in paths.iter().enumerate() {
            self.simulate_latency(None).await;
            self.lookup(&bundle.name, path, asset_type)?;
            self.state.borrow_mut().primed.insert(CacheKey {
                bundle: bundle.name.clone(),
                path: path.clone(),
                asset_type: asset_type.clone(),
            });
            if let Some(progress) = progress {
                progress(index + 1, paths.len());
            }
        }
        Ok(())
    }

    fn instantiate(&self, template: &MemoryTemplate) -> InstanceId {
        let id = self.state.borrow_mut().nodes.insert(SceneNode {
            name: template.name.clone(),
            active: true,
            parent: None,
            tag: None,
        });
        self.record(SceneEvent::Created(id));
        id
    }

    fn remove_bundle(&self, bundle: &MemoryBundle) {
        let mut state = self.state.borrow_mut();
        state.removed_bundles.push(bundle.name.clone());
        state.primed.retain(|key| key.bundle != bundle.name);
    }
}

impl SceneBackend for MemoryBackend {
    fn create_node(&self, name: &str) -> InstanceId {
        let id = self.state.borrow_mut().nodes.insert(SceneNode {
            name: name.to_string(),
            active: true,
            parent: None,
            tag: None,
        });
        self.record(SceneEvent::Created(id));
        id
    }

    fn is_valid(&self, instance: InstanceId) -> bool {
        self.state.borrow().nodes.contains_key(instance)
    }

    fn set_active(&self, instance: InstanceId, active: bool) {
        if let Some(node) = self.state.borrow_mut().nodes.get_mut(instance) {
            node.active = active;
        }
        self.record(SceneEvent::Activated(instance, active));
    }

    fn set_parent(&self, instance: InstanceId, parent: Option<InstanceId>) {
        if let Some(node) = self.state.borrow_mut().nodes.get_mut(instance) {
            node.parent = parent;
        }
        self.record(SceneEvent::Parented(instance, parent));
    }

    fn attach_tag(&self, instance: InstanceId, tag: PoolTag) {
        let key = tag.pool_key.clone();
        if let Some(node) = self.state.borrow_mut().nodes.get_mut(instance) {
            node.tag = Some(tag);
        }
        self.record(SceneEvent::TagAttached(instance, key));
    }

    fn tag(&self, instance: InstanceId) -> Option<PoolTag> {
        self.state.borrow().nodes.get(instance).and_then(|node| node.tag.clone())
    }

    fn destroy(&self, instance: InstanceId) {
        let mut doomed = vec![instance];
        let mut index = 0;
        {
            let mut state = self.state.borrow_mut();
            while index < doomed.len() {
                let current = doomed[index];
                doomed.extend(
                    state
                        .nodes
                        .iter()
                        .filter(|(_, node)| node.parent == Some(current))
                        .map(|(id, _)| id),
                );
                index += 1;
            }
            for id in &doomed {
                state.nodes.remove(*id);
            }
        }
        for id in doomed {
            self.record(SceneEvent::Destroyed(id));
        }
    }

    fn on_spawned(&self, instance: InstanceId) {
        self.record(SceneEvent::Spawned(instance));
    }

    fn on_despawned(&self, instance: InstanceId) {
        self.record(SceneEvent::Despawned(instance));
    }
}

/// Pool key helper for tests and tools: `"{bundle}::{path}"`
pub fn template_pool_key(bundle: &str, path: &str) -> Option<PoolKey> {
    CacheKey::new(bundle, path, AssetType::PREFAB)
        .ok()
        .map(|key| PoolKey::for_template(&key))
}
