//! Resource Cache - bundle and asset loading with deduplication and ref counting
//!
//! Single source of truth for "has this `(bundle, path, type)` been loaded,
//! and if not, load it exactly once even under concurrent callers".
//!
//! ```text
//! load(key)
//!    ├── cached?     → ref += 1, return value (no await, no progress)
//!    ├── in flight?  → join, await shared outcome, ref += 1
//!    └── otherwise   → register in-flight (synchronously), spawn load task
//!                        bundle (deduped) → backend.load_typed → entry(ref = 1)
//!                        settle in-flight on success *and* failure
//! ```
//!
//! Loads run as `spawn_local` tasks: a caller that stops awaiting does not
//! cancel the load, which still populates the cache when it settles.
//!
//! **Ownership**: constructed by the composition root
//! ([`crate::ResourceContext`]) and shared by cloning the handle.

use super::backend::AssetBackend;
use super::in_flight::{InFlightTable, Join, Pending};
use super::{downcast_asset, Asset, AssetType, CacheKey, PreloadRequest, ResourceError};
use crate::core::config::CacheConfig;
use crate::foundation::collections::group_ordered;
use crate::foundation::progress::{scale_into, ProgressFn, ProgressReporter};
use crate::foundation::runtime::yield_once;
use std::any::Any;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// Cached value plus its reference count (always >= 1 while present)
struct AssetEntry {
    value: Rc<dyn Any>,
    refs: usize,
}

/// Counters for debugging and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Loads answered from the cache
    pub hits: u64,
    /// Loads that started an underlying backend load
    pub misses: u64,
    /// Loads that joined an operation already in flight
    pub joined: u64,
    /// Underlying bundle loads started
    pub bundle_loads: u64,
    /// Asset entries removed
    pub evictions: u64,
}

/// Options for [`ResourceCache::preload_list`]
#[derive(Clone, Default)]
pub struct PreloadOptions {
    /// Cumulative progress across all type-groups
    pub on_progress: Option<ProgressFn>,
    /// Override [`CacheConfig::yield_between_groups`]
    pub yield_between_groups: Option<bool>,
}

impl PreloadOptions {
    /// Attach a progress callback
    pub fn with_progress(mut self, on_progress: impl Fn(usize, usize) + 'static) -> Self {
        self.on_progress = Some(Rc::new(on_progress));
        self
    }

    /// Force yielding on or off
    pub fn with_yield_between_groups(mut self, enabled: bool) -> Self {
        self.yield_between_groups = Some(enabled);
        self
    }
}

struct CacheState<Bundle> {
    bundles: HashMap<String, Bundle>,
    assets: HashMap<CacheKey, AssetEntry>,
    bundle_loads: InFlightTable<String, Bundle>,
    asset_loads: InFlightTable<CacheKey, Rc<dyn Any>>,
    stats: CacheStats,
}

struct CacheInner<B: AssetBackend> {
    backend: Rc<B>,
    config: CacheConfig,
    state: RefCell<CacheState<B::Bundle>>,
}

/// Resource Cache
///
/// Cheap to clone; clones share the same state. Must be driven from inside a
/// tokio `LocalSet` (see [`crate::foundation::runtime`]).
pub struct ResourceCache<B: AssetBackend> {
    inner: Rc<CacheInner<B>>,
}

impl<B: AssetBackend> Clone for ResourceCache<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<B: AssetBackend> ResourceCache<B> {
    /// Create a cache over `backend`
    pub fn new(backend: Rc<B>, config: CacheConfig) -> Self {
        log::info!("Creating ResourceCache with config: {:?}", config);
        Self {
            inner: Rc::new(CacheInner {
                backend,
                config,
                state: RefCell::new(CacheState {
                    bundles: HashMap::new(),
                    assets: HashMap::new(),
                    bundle_loads: InFlightTable::new(),
                    asset_loads: InFlightTable::new(),
                    stats: CacheStats::default(),
                }),
            }),
        }
    }

    /// The backend this cache loads through
    pub fn backend(&self) -> &Rc<B> {
        &self.inner.backend
    }

    /// Load a bundle, or return the cached one
    ///
    /// Concurrent calls for the same name share one underlying load.
    pub async fn load_bundle(&self, bundle_name: &str) -> Result<B::Bundle, ResourceError> {
        let name = bundle_name.trim();
        if name.is_empty() {
            return Err(ResourceError::InvalidBundleOrPath {
                bundle: String::new(),
                path: String::new(),
            });
        }
        CacheInner::bundle(&self.inner, name).await
    }

    /// Load a typed asset
    ///
    /// Cache hits return without suspending and without calling `on_progress`.
    /// Every successful call hands out one reference; pair it with
    /// [`Self::release`].
    pub async fn load<T: Asset>(
        &self,
        bundle_name: &str,
        path: &str,
        on_progress: Option<ProgressFn>,
    ) -> Result<Rc<T>, ResourceError> {
        let key = CacheKey::of::<T>(bundle_name, path)?;
        let value = self.load_checked(&key, on_progress, value_is::<T>).await?;
        downcast_asset::<T>(value, &key)
    }

    /// Load the backend's template type
    pub async fn load_prefab(
        &self,
        bundle_name: &str,
        path: &str,
        on_progress: Option<ProgressFn>,
    ) -> Result<Rc<B::Template>, ResourceError> {
        self.load::<B::Template>(bundle_name, path, on_progress).await
    }

    /// Load by key without downcasting
    pub async fn load_key(&self, key: &CacheKey, on_progress: Option<ProgressFn>) -> Result<Rc<dyn Any>, ResourceError> {
        self.load_checked(key, on_progress, accept_any).await
    }

    /// Load `key`, handing out a reference only when `accepts` approves the value
    async fn load_checked(
        &self,
        key: &CacheKey,
        on_progress: Option<ProgressFn>,
        accepts: fn(&dyn Any) -> bool,
    ) -> Result<Rc<dyn Any>, ResourceError> {
        // Nothing in this block may await: check and registration must be atomic
        let (pending, joined) = {
            let mut guard = self.inner.state.borrow_mut();
            let state = &mut *guard;

            if let Some(entry) = state.assets.get_mut(key) {
                if !accepts(&*entry.value) {
                    return Err(type_mismatch(key));
                }
                entry.refs += 1;
                let value = Rc::clone(&entry.value);
                state.stats.hits += 1;
                log::debug!("Cache hit for {}", key);
                return Ok(value);
            }

            match state.asset_loads.join_or_register(key) {
                Join::Joined(pending) => {
                    state.stats.joined += 1;
                    log::debug!("Joining in-flight load of {}", key);
                    (pending, true)
                }
                Join::Registered(pending) => {
                    state.stats.misses += 1;
                    log::debug!("Cache miss for {}, starting load", key);
                    let inner = Rc::clone(&self.inner);
                    let task_key = key.clone();
                    tokio::task::spawn_local(async move {
                        CacheInner::run_asset_load(inner, task_key, on_progress, accepts).await;
                    });
                    (pending, false)
                }
            }
        };

        let value = pending.wait().await?;
        if !accepts(&*value) {
            return Err(type_mismatch(key));
        }
        if joined {
            // The loading task already owns the first reference
            self.inner.acquire(key, &value);
        }
        Ok(value)
    }

    /// Warm the loading pipeline for a list of resources
    ///
    /// Requests already cached or in flight are skipped and duplicates are
    /// collapsed. The rest are grouped by type, one backend batch per group,
    /// with a cooperative yield after each group. A failing group aborts the
    /// remaining groups. No cache entries are created.
    pub async fn preload_list(
        &self,
        bundle_name: &str,
        requests: &[PreloadRequest],
        options: PreloadOptions,
    ) -> Result<(), ResourceError> {
        let bundle = self.load_bundle(bundle_name).await?;
        if requests.is_empty() {
            return Ok(());
        }

        let bundle_name = bundle_name.trim();
        let template_type = <B::Template as Asset>::ASSET_TYPE;
        let mut seen = HashSet::new();
        let mut pending: Vec<(AssetType, String)> = Vec::new();
        {
            let state = self.inner.state.borrow();
            for request in requests {
                let key = CacheKey::new(bundle_name, request.path(), request.resolve_type(&template_type))?;
                if state.assets.contains_key(&key) || state.asset_loads.contains(&key) {
                    continue;
                }
                if seen.insert(key.clone()) {
                    pending.push((key.asset_type, key.path));
                }
            }
        }

        if pending.is_empty() {
            log::debug!("Preload of {} request(s) from '{}' already satisfied", requests.len(), bundle_name);
            return Ok(());
        }

        let total = pending.len();
        let groups = group_ordered(pending);
        let yield_between_groups = options
            .yield_between_groups
            .unwrap_or(self.inner.config.yield_between_groups);
        let reporter = ProgressReporter::new(options.on_progress);
        let mut finished = 0;

        log::debug!(
            "Preloading {} asset(s) from '{}' in {} group(s)",
            total,
            bundle_name,
            groups.len()
        );

        for (asset_type, paths) in groups {
            let share = paths.len();
            let base = finished;
            let group_progress = |group_finished: usize, group_total: usize| {
                reporter.report(scale_into(base, share, group_finished, group_total), total);
            };
            let progress: Option<&dyn Fn(usize, usize)> = if reporter.is_attached() {
                Some(&group_progress)
            } else {
                None
            };

            self.inner
                .backend
                .preload_batch(&bundle, &paths, &asset_type, progress)
                .await
                .map_err(|reason| {
                    log::debug!("Preload group {} from '{}' failed: {}", asset_type, bundle_name, reason);
                    ResourceError::PreloadFailed {
                        bundle: bundle_name.to_string(),
                        asset_type: asset_type.clone(),
                        paths: paths.clone(),
                        reason,
                    }
                })?;

            finished += share;
            reporter.report(finished, total);

            if yield_between_groups {
                yield_once().await;
            }
        }

        Ok(())
    }

    /// Drop one reference to `key`; the entry is evicted at zero
    ///
    /// Returns `false` for unknown keys, which is not an error.
    pub fn release(&self, key: &CacheKey) -> bool {
        let mut state = self.inner.state.borrow_mut();
        let Some(entry) = state.assets.get_mut(key) else {
            return false;
        };

        entry.refs -= 1;
        if entry.refs == 0 {
            state.assets.remove(key);
            state.stats.evictions += 1;
            log::debug!("Evicted {}", key);
        }
        true
    }

    /// Typed convenience for [`Self::release`]
    pub fn release_asset<T: Asset>(&self, bundle_name: &str, path: &str) -> bool {
        CacheKey::of::<T>(bundle_name, path).is_ok_and(|key| self.release(&key))
    }

    /// Evict every cached asset regardless of reference count
    ///
    /// In-flight loads are untouched and still populate the cache when they settle.
    pub fn release_all(&self) -> usize {
        let mut state = self.inner.state.borrow_mut();
        let count = state.assets.len();
        state.assets.clear();
        state.stats.evictions += count as u64;
        if count > 0 {
            log::info!("Released {} cached asset(s)", count);
        }
        count
    }

    /// Evict a bundle and every asset loaded through it, and drop it from the backend
    pub fn release_bundle(&self, bundle_name: &str) -> bool {
        let name = bundle_name.trim();
        let bundle = {
            let mut state = self.inner.state.borrow_mut();
            let Some(bundle) = state.bundles.remove(name) else {
                return false;
            };
            let before = state.assets.len();
            state.assets.retain(|key, _| key.bundle != name);
            let evicted = before - state.assets.len();
            state.stats.evictions += evicted as u64;
            log::info!("Released bundle '{}' ({} cached asset(s) evicted)", name, evicted);
            bundle
        };

        self.inner.backend.remove_bundle(&bundle);
        true
    }

    /// Current reference count of `key` (0 when not cached)
    pub fn ref_count(&self, key: &CacheKey) -> usize {
        self.inner.state.borrow().assets.get(key).map_or(0, |entry| entry.refs)
    }

    /// Whether `key` has a cache entry
    pub fn is_cached(&self, key: &CacheKey) -> bool {
        self.inner.state.borrow().assets.contains_key(key)
    }

    /// Whether a load for `key` is in flight
    pub fn is_loading(&self, key: &CacheKey) -> bool {
        self.inner.state.borrow().asset_loads.contains(key)
    }

    /// Whether a bundle is cached
    pub fn is_bundle_loaded(&self, bundle_name: &str) -> bool {
        self.inner.state.borrow().bundles.contains_key(bundle_name.trim())
    }

    /// Number of cached assets
    pub fn cached_count(&self) -> usize {
        self.inner.state.borrow().assets.len()
    }

    /// Snapshot of the cache counters
    pub fn stats(&self) -> CacheStats {
        self.inner.state.borrow().stats
    }
}

fn value_is<T: Asset>(value: &dyn Any) -> bool {
    value.is::<T>()
}

fn accept_any(_value: &dyn Any) -> bool {
    true
}

fn type_mismatch(key: &CacheKey) -> ResourceError {
    ResourceError::TypeMismatch { key: key.to_string() }
}

impl<B: AssetBackend> CacheInner<B> {
    /// Cached bundle, joined bundle load, or a new bundle load
    async fn bundle(this: &Rc<Self>, name: &str) -> Result<B::Bundle, ResourceError> {
        let pending: Pending<B::Bundle> = {
            let mut guard = this.state.borrow_mut();
            let state = &mut *guard;
            if let Some(bundle) = state.bundles.get(name) {
                return Ok(bundle.clone());
            }

            let key = name.to_string();
            match state.bundle_loads.join_or_register(&key) {
                Join::Joined(pending) => pending,
                Join::Registered(pending) => {
                    state.stats.bundle_loads += 1;
                    let inner = Rc::clone(this);
                    tokio::task::spawn_local(async move {
                        Self::run_bundle_load(inner, key).await;
                    });
                    pending
                }
            }
        };

        pending.wait().await
    }

    async fn run_bundle_load(this: Rc<Self>, name: String) {
        log::debug!("Loading bundle '{}'", name);
        let result = this
            .backend
            .load_bundle(&name)
            .await
            .map_err(|reason| ResourceError::BundleLoadFailed {
                bundle: name.clone(),
                reason,
            });

        let mut state = this.state.borrow_mut();
        match &result {
            Ok(bundle) => {
                state.bundles.insert(name.clone(), bundle.clone());
                log::info!("Bundle '{}' loaded", name);
            }
            Err(err) => log::debug!("{}", err),
        }
        state.bundle_loads.settle(&name, result);
    }

    async fn run_asset_load(
        this: Rc<Self>,
        key: CacheKey,
        on_progress: Option<ProgressFn>,
        accepts: fn(&dyn Any) -> bool,
    ) {
        let reporter = ProgressReporter::new(on_progress);
        let result = Self::fetch_asset(&this, &key, &reporter).await;
        let succeeded = result.is_ok();

        {
            let mut state = this.state.borrow_mut();
            match &result {
                // The initiator will not own it; a joined caller of the right type re-inserts it
                Ok(value) if !accepts(&**value) => {
                    log::warn!("Loaded {} is not of the requested type, not caching it", key);
                }
                Ok(value) => {
                    state.assets.insert(
                        key.clone(),
                        AssetEntry {
                            value: Rc::clone(value),
                            refs: 1,
                        },
                    );
                    log::debug!("Cached {}", key);
                }
                Err(err) => log::debug!("Load of {} failed: {}", key, err),
            }
            state.asset_loads.settle(&key, result);
        }

        // Outside the borrow: the callback may call back into the cache
        if succeeded {
            reporter.complete();
        }
    }

    async fn fetch_asset(this: &Rc<Self>, key: &CacheKey, reporter: &ProgressReporter) -> Result<Rc<dyn Any>, ResourceError> {
        let bundle = Self::bundle(this, &key.bundle).await?;

        let tick = |finished: usize, total: usize| reporter.report(finished, total);
        let progress: Option<&dyn Fn(usize, usize)> = if reporter.is_attached() { Some(&tick) } else { None };

        this.backend
            .load_typed(&bundle, &key.path, &key.asset_type, progress)
            .await
            .map_err(|reason| ResourceError::AssetLoadFailed {
                bundle: key.bundle.clone(),
                path: key.path.clone(),
                asset_type: key.asset_type.clone(),
                reason,
            })
    }

    /// Take one reference for a caller that joined an in-flight load
    fn acquire(&self, key: &CacheKey, value: &Rc<dyn Any>) {
        let mut state = self.state.borrow_mut();
        match state.assets.get_mut(key) {
            Some(entry) => entry.refs += 1,
            // Released between settling and this waiter resuming
            None => {
                state.assets.insert(
                    key.clone(),
                    AssetEntry {
                        value: Rc::clone(value),
                        refs: 1,
                    },
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryBackend, MemoryTemplate};
    use crate::foundation::runtime::block_on_local;
    use std::cell::Cell;

    #[derive(Debug)]
    struct Icon;

    impl Asset for Icon {
        const ASSET_TYPE: AssetType = AssetType::TEXTURE;
    }

    fn setup(latency: usize) -> (Rc<MemoryBackend>, ResourceCache<MemoryBackend>) {
        let backend = Rc::new(MemoryBackend::new().with_latency(latency));
        backend.register_template("prefab", "map/A");
        backend.register_template("prefab", "map/B");
        backend.register_asset("prefab", "ui/coin", Icon);
        let cache = ResourceCache::new(Rc::clone(&backend), CacheConfig::default());
        (backend, cache)
    }

    fn key(path: &str) -> CacheKey {
        CacheKey::of::<MemoryTemplate>("prefab", path).unwrap()
    }

    fn recording() -> (ProgressFn, Rc<RefCell<Vec<(usize, usize)>>>) {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&calls);
        let callback: ProgressFn = Rc::new(move |finished, total| sink.borrow_mut().push((finished, total)));
        (callback, calls)
    }

    fn assert_monotonic(calls: &[(usize, usize)]) {
        for window in calls.windows(2) {
            assert!(window[0].0 <= window[1].0, "progress went backwards: {:?}", calls);
        }
        for &(finished, total) in calls {
            assert!(total >= 1 && finished <= total, "progress out of range: {:?}", calls);
        }
    }

    #[test]
    fn test_concurrent_loads_share_one_backend_call() {
        let (backend, cache) = setup(3);

        let (a, b) = block_on_local(async {
            tokio::join!(
                cache.load::<MemoryTemplate>("prefab", "map/A", None),
                cache.load::<MemoryTemplate>("prefab", "map/A", None)
            )
        })
        .unwrap();

        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(backend.load_typed_count(&key("map/A")), 1);
        assert_eq!(backend.bundle_load_count("prefab"), 1);
        assert_eq!(cache.ref_count(&key("map/A")), 2);

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.joined, 1);
        assert!(!cache.is_loading(&key("map/A")));
    }

    #[test]
    fn test_cache_hit_until_released() {
        let (backend, cache) = setup(1);
        let k = key("map/A");

        block_on_local(async {
            let first = cache.load_prefab("prefab", "map/A", None).await.unwrap();
            let (callback, calls) = recording();
            let second = cache.load_prefab("prefab", "map/A", Some(callback)).await.unwrap();
            assert!(Rc::ptr_eq(&first, &second));
            assert!(calls.borrow().is_empty());
        })
        .unwrap();

        assert_eq!(backend.load_typed_count(&k), 1);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.ref_count(&k), 2);

        assert!(cache.release(&k));
        assert!(cache.is_cached(&k));
        assert!(cache.release(&k));
        assert!(!cache.is_cached(&k));
        assert_eq!(cache.ref_count(&k), 0);
        assert!(!cache.release(&k));

        block_on_local(cache.load_prefab("prefab", "map/A", None)).unwrap().unwrap();
        assert_eq!(backend.load_typed_count(&k), 2);
    }

    #[test]
    fn test_release_unknown_key_is_noop() {
        let (_backend, cache) = setup(0);
        assert!(!cache.release(&key("never/loaded")));
        assert!(!cache.release_asset::<Icon>("prefab", "ui/coin"));
        assert!(!cache.release_asset::<Icon>("", "ui/coin"));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_failure_reaches_every_waiter_and_allows_retry() {
        let (backend, cache) = setup(2);
        backend.fail_asset("prefab", "map/A");

        let (a, b) = block_on_local(async {
            tokio::join!(
                cache.load_prefab("prefab", "map/A", None),
                cache.load_prefab("prefab", "map/A", None)
            )
        })
        .unwrap();

        let (a, b) = (a.unwrap_err(), b.unwrap_err());
        assert_eq!(a, b);
        assert!(matches!(a, ResourceError::AssetLoadFailed { ref path, .. } if path == "map/A"));
        assert!(!cache.is_loading(&key("map/A")));
        assert!(!cache.is_cached(&key("map/A")));
        assert_eq!(backend.load_typed_count(&key("map/A")), 1);

        backend.clear_failures();
        block_on_local(cache.load_prefab("prefab", "map/A", None)).unwrap().unwrap();
        assert_eq!(cache.ref_count(&key("map/A")), 1);
        assert_eq!(backend.load_typed_count(&key("map/A")), 2);
    }

    #[test]
    fn test_bundle_loads_are_deduplicated() {
        let (backend, cache) = setup(2);

        let (a, b, bundle) = block_on_local(async {
            tokio::join!(
                cache.load_prefab("prefab", "map/A", None),
                cache.load_prefab("prefab", "map/B", None),
                cache.load_bundle("prefab")
            )
        })
        .unwrap();

        assert!(a.is_ok() && b.is_ok());
        assert_eq!(bundle.unwrap().name, "prefab");
        assert_eq!(backend.bundle_load_count("prefab"), 1);
        assert_eq!(cache.stats().bundle_loads, 1);
        assert!(cache.is_bundle_loaded("prefab"));
    }

    #[test]
    fn test_bundle_failure_is_not_cached() {
        let (backend, cache) = setup(0);
        backend.fail_bundle("prefab");

        let err = block_on_local(cache.load_prefab("prefab", "map/A", None)).unwrap().unwrap_err();
        assert!(matches!(err, ResourceError::BundleLoadFailed { ref bundle, .. } if bundle == "prefab"));
        assert!(!cache.is_bundle_loaded("prefab"));

        backend.clear_failures();
        block_on_local(cache.load_prefab("prefab", "map/A", None)).unwrap().unwrap();
        assert_eq!(backend.bundle_load_count("prefab"), 2);
    }

    #[test]
    fn test_invalid_bundle_or_path() {
        let (backend, cache) = setup(0);
        let err = block_on_local(cache.load_prefab(" ", "map/A", None)).unwrap().unwrap_err();
        assert!(matches!(err, ResourceError::InvalidBundleOrPath { .. }));
        let err = block_on_local(cache.load_bundle("")).unwrap().unwrap_err();
        assert!(matches!(err, ResourceError::InvalidBundleOrPath { .. }));
        assert_eq!(backend.bundle_load_count(""), 0);
    }

    #[test]
    fn test_load_progress_ends_at_total() {
        let (_backend, cache) = setup(3);
        let (callback, calls) = recording();

        block_on_local(cache.load_prefab("prefab", "map/A", Some(callback)))
            .unwrap()
            .unwrap();

        let calls = calls.borrow();
        assert_monotonic(&calls);
        assert_eq!(calls.first(), Some(&(1, 3)));
        assert_eq!(calls.last(), Some(&(3, 3)));
    }

    #[test]
    fn test_preload_then_load_uses_primed_pipeline() {
        let (backend, cache) = setup(1);
        let (callback, calls) = recording();
        let requests = [PreloadRequest::prefab("map/A"), PreloadRequest::prefab("map/B")];

        block_on_local(async {
            let options = PreloadOptions {
                on_progress: Some(callback),
                ..PreloadOptions::default()
            };
            cache.preload_list("prefab", &requests, options).await.unwrap();
            cache.load_prefab("prefab", "map/A", None).await.unwrap();
        })
        .unwrap();

        let calls = calls.borrow();
        assert_monotonic(&calls);
        assert_eq!(calls.last(), Some(&(2, 2)));

        let batches = backend.preload_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].paths, vec!["map/A".to_string(), "map/B".to_string()]);
        assert!(backend.is_primed(&key("map/A")));
        assert_eq!(backend.load_typed_count(&key("map/A")), 1);
        assert!(!cache.is_cached(&key("map/B")));
    }

    #[test]
    fn test_preload_skips_cached_and_duplicate_requests() {
        let (backend, cache) = setup(0);
        let (callback, calls) = recording();

        block_on_local(async {
            cache.load_prefab("prefab", "map/A", None).await.unwrap();
            let requests = [
                PreloadRequest::prefab("map/A"),
                PreloadRequest::prefab("map/B"),
                PreloadRequest::prefab("map/B"),
            ];
            cache.preload_list("prefab", &requests, PreloadOptions::default()).await.unwrap();

            let options = PreloadOptions::default().with_progress(move |finished, total| callback(finished, total));
            cache
                .preload_list("prefab", &[PreloadRequest::prefab("map/A")], options)
                .await
                .unwrap();
        })
        .unwrap();

        let batches = backend.preload_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].paths, vec!["map/B".to_string()]);
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn test_preload_groups_by_type() {
        let (backend, cache) = setup(0);
        let (callback, calls) = recording();
        let requests = [
            PreloadRequest::prefab("map/A"),
            PreloadRequest::asset("ui/coin", AssetType::TEXTURE),
            PreloadRequest::prefab("map/B"),
        ];

        block_on_local(async {
            let options = PreloadOptions {
                on_progress: Some(callback),
                yield_between_groups: Some(false),
            };
            cache.preload_list("prefab", &requests, options).await.unwrap();
        })
        .unwrap();

        let batches = backend.preload_batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].asset_type, AssetType::PREFAB);
        assert_eq!(batches[0].paths, vec!["map/A".to_string(), "map/B".to_string()]);
        assert_eq!(batches[1].asset_type, AssetType::TEXTURE);
        assert_eq!(batches[1].paths, vec!["ui/coin".to_string()]);

        let calls = calls.borrow();
        assert_monotonic(&calls);
        assert!(calls.contains(&(2, 3)));
        assert_eq!(calls.last(), Some(&(3, 3)));
    }

    /// Preload two type-groups; a task spawned from the first group's progress
    /// callback records how many batches the backend had seen when it ran
    fn batches_seen_by_sibling(yield_between_groups: bool) -> usize {
        let (backend, cache) = setup(0);
        let seen = Rc::new(Cell::new(None));
        let spawned = Rc::new(Cell::new(false));
        let requests = [
            PreloadRequest::prefab("map/A"),
            PreloadRequest::asset("ui/coin", AssetType::TEXTURE),
        ];

        let (sibling_backend, sibling_seen) = (Rc::clone(&backend), Rc::clone(&seen));
        let options = PreloadOptions::default()
            .with_yield_between_groups(yield_between_groups)
            .with_progress(move |_, _| {
                if spawned.replace(true) {
                    return;
                }
                let backend = Rc::clone(&sibling_backend);
                let seen = Rc::clone(&sibling_seen);
                tokio::task::spawn_local(async move {
                    seen.set(Some(backend.preload_batches().len()));
                });
            });

        block_on_local(async {
            cache.preload_list("prefab", &requests, options).await.unwrap();
            yield_once().await;
        })
        .unwrap();

        assert_eq!(backend.preload_batches().len(), 2);
        seen.get().unwrap()
    }

    #[test]
    fn test_preload_yields_between_groups() {
        assert_eq!(batches_seen_by_sibling(true), 1);
    }

    #[test]
    fn test_preload_without_yield_runs_groups_back_to_back() {
        assert_eq!(batches_seen_by_sibling(false), 2);
    }

    #[test]
    fn test_failed_group_aborts_remaining_groups() {
        let (backend, cache) = setup(0);
        backend.fail_asset("prefab", "map/B");
        let requests = [
            PreloadRequest::prefab("map/A"),
            PreloadRequest::prefab("map/B"),
            PreloadRequest::asset("ui/coin", AssetType::TEXTURE),
        ];

        let err = block_on_local(cache.preload_list("prefab", &requests, PreloadOptions::default()))
            .unwrap()
            .unwrap_err();

        match err {
            ResourceError::PreloadFailed { asset_type, paths, .. } => {
                assert_eq!(asset_type, AssetType::PREFAB);
                assert_eq!(paths.len(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(backend.preload_batches().len(), 1);
    }

    #[test]
    fn test_release_bundle_evicts_its_assets() {
        let (backend, cache) = setup(0);
        block_on_local(async {
            cache.load_prefab("prefab", "map/A", None).await.unwrap();
            cache.load::<Icon>("prefab", "ui/coin", None).await.unwrap();
        })
        .unwrap();
        assert_eq!(cache.cached_count(), 2);

        assert!(cache.release_bundle("prefab"));
        assert_eq!(cache.cached_count(), 0);
        assert!(!cache.is_bundle_loaded("prefab"));
        assert_eq!(backend.removed_bundles(), vec!["prefab".to_string()]);
        assert!(!cache.release_bundle("prefab"));
    }

    #[test]
    fn test_release_all_ignores_ref_counts() {
        let (_backend, cache) = setup(0);
        block_on_local(async {
            cache.load_prefab("prefab", "map/A", None).await.unwrap();
            cache.load_prefab("prefab", "map/A", None).await.unwrap();
            cache.load_prefab("prefab", "map/B", None).await.unwrap();
        })
        .unwrap();

        assert_eq!(cache.release_all(), 2);
        assert_eq!(cache.cached_count(), 0);
        assert_eq!(cache.stats().evictions, 2);
    }

    #[test]
    fn test_abandoned_caller_still_populates_cache() {
        use std::future::Future;
        use std::task::Poll;

        let (backend, cache) = setup(3);

        block_on_local(async {
            // Poll once so the load is registered, then drop the caller
            let mut load = Box::pin(cache.load_prefab("prefab", "map/A", None));
            std::future::poll_fn(|cx| {
                let _ = load.as_mut().poll(cx);
                Poll::Ready(())
            })
            .await;
            assert!(cache.is_loading(&key("map/A")));
            drop(load);

            for _ in 0..100 {
                if cache.is_cached(&key("map/A")) {
                    break;
                }
                yield_once().await;
            }
        })
        .unwrap();

        assert!(cache.is_cached(&key("map/A")));
        assert_eq!(cache.ref_count(&key("map/A")), 1);
        assert_eq!(backend.load_typed_count(&key("map/A")), 1);
    }

    #[test]
    fn test_type_mismatch_takes_no_reference() {
        #[derive(Debug)]
        struct Fake;
        impl Asset for Fake {
            const ASSET_TYPE: AssetType = AssetType::TEXTURE;
        }

        let (backend, cache) = setup(0);
        let key = CacheKey::new("prefab", "ui/coin", AssetType::TEXTURE).unwrap();

        let err = block_on_local(cache.load::<Fake>("prefab", "ui/coin", None))
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, ResourceError::TypeMismatch { .. }));
        assert_eq!(cache.ref_count(&key), 0);
        assert!(!cache.is_cached(&key));

        block_on_local(cache.load::<Icon>("prefab", "ui/coin", None)).unwrap().unwrap();
        assert_eq!(cache.ref_count(&key), 1);

        let err = block_on_local(cache.load::<Fake>("prefab", "ui/coin", None))
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, ResourceError::TypeMismatch { .. }));
        assert_eq!(cache.ref_count(&key), 1);

        assert!(cache.release(&key));
        assert!(!cache.is_cached(&key));
        assert_eq!(backend.load_typed_count(&key), 2);
    }

    #[test]
    fn test_joined_mismatch_takes_no_reference() {
        #[derive(Debug)]
        struct Fake;
        impl Asset for Fake {
            const ASSET_TYPE: AssetType = AssetType::TEXTURE;
        }

        let (_backend, cache) = setup(2);
        let key = CacheKey::new("prefab", "ui/coin", AssetType::TEXTURE).unwrap();

        let (icon, fake) = block_on_local(async {
            tokio::join!(
                cache.load::<Icon>("prefab", "ui/coin", None),
                cache.load::<Fake>("prefab", "ui/coin", None)
            )
        })
        .unwrap();

        assert!(icon.is_ok());
        assert!(matches!(fake, Err(ResourceError::TypeMismatch { .. })));
        assert_eq!(cache.ref_count(&key), 1);
    }
}
