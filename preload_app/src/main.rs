//! Preload demo application
//!
//! Drives the resource engine the way a client entry screen does: preload the
//! configured prefabs with a progress readout, spawn the first one through the
//! pool, despawn it, spawn it again from the pool and shut everything down.
//!
//! Usage: `preload_app [resources.toml|resources.ron]`

use resource_engine::foundation::logging;
use resource_engine::prelude::*;
use std::rc::Rc;
use thiserror::Error;

/// Prefabs used when no config file is given
const DEMO_PREFABS: [&str; 3] = ["map/Map_S01_GreenPlanet_01", "unit/Knight", "fx/Hit"];

#[derive(Error, Debug)]
enum AppError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("Nothing to spawn: the preload list is empty")]
    NothingToSpawn,
}

fn load_config() -> Result<ResourceConfig, AppError> {
    match std::env::args().nth(1) {
        Some(path) => {
            log::info!("Loading resource config from {}", path);
            Ok(ResourceConfig::load_from_file(&path)?)
        }
        None => {
            log::info!("No config file given, using the demo preload list");
            let paths = DEMO_PREFABS.iter().map(|path| (*path).to_string()).collect();
            Ok(ResourceConfig::default()
                .with_preload("prefab", paths)
                .with_prewarm("prefab", "fx/Hit", 4))
        }
    }
}

/// Backend whose catalog holds every template the config mentions
fn seed_backend(config: &ResourceConfig) -> Rc<MemoryBackend> {
    let backend = Rc::new(MemoryBackend::new().with_latency(2));
    for path in &config.preload.paths {
        backend.register_template(&config.preload.bundle, path);
    }
    for entry in &config.pools.prewarm {
        backend.register_template(&entry.bundle, &entry.path);
    }
    backend
}

async fn run(context: &ResourceContext<MemoryBackend, MemoryBackend>) -> Result<(), AppError> {
    let progress: ProgressFn = Rc::new(|finished, total| {
        log::info!("Loading... {}/{} ({}%)", finished, total, finished * 100 / total.max(1));
    });
    context.initialize(Some(progress)).await?;

    let preload = &context.config().preload;
    let first = preload.paths.first().ok_or(AppError::NothingToSpawn)?;

    let pools = context.pools();
    let instance = pools.spawn(&preload.bundle, first, None, None).await?;
    log::info!("Spawned {} as {:?}", first, instance);

    let outcome = pools.despawn(instance)?;
    log::info!("Despawned {:?}: {:?}", instance, outcome);

    let again = pools.spawn(&preload.bundle, first, None, None).await?;
    log::info!(
        "Spawned {} again as {:?} ({})",
        first,
        again,
        if again == instance { "reused from pool" } else { "new instance" }
    );

    log::info!("Cache: {:?}", context.cache().stats());
    log::info!("Pools: {:?}", pools.stats());

    context.shutdown()?;
    Ok(())
}

fn main() {
    logging::init();

    let result = load_config().and_then(|config| {
        let backend = seed_backend(&config);
        let context = ResourceContext::new(config, Rc::clone(&backend), backend);
        block_on_local(run(&context))?
    });

    if let Err(err) = result {
        log::error!("Preload demo failed: {}", err);
        std::process::exit(1);
    }
    log::info!("Preload demo finished");
}
