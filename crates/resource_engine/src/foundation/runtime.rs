//! Single-threaded cooperative runtime
//!
//! The cache and pools are `Rc`-based and spawn their underlying loads with
//! `tokio::task::spawn_local`, so every entry point must run inside a
//! [`LocalSet`] on a current-thread runtime. Hosts that already own such a
//! runtime can drive the futures themselves; everything else goes through
//! [`block_on_local`].

use std::future::Future;
use tokio::task::LocalSet;

/// Drive `future` to completion on a fresh current-thread runtime inside a `LocalSet`
pub fn block_on_local<F: Future>(future: F) -> std::io::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread().build()?;
    let local = LocalSet::new();
    Ok(local.block_on(&runtime, future))
}

/// Give other tasks on this thread a chance to run
pub async fn yield_once() {
    tokio::task::yield_now().await;
}
