//! Periodic background work for plugins and services.
//!
//! Every [`Pokable`] gets its own loop: sleep for [`Pokable::poke_every`],
//! call [`Pokable::poke`], repeat until `poke` returns `true`. Loops share no
//! clock and no state with each other.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use crate::plugin::Plugin;
use crate::service::Service;

/// Something that wants to be woken up on a timer.
#[async_trait]
pub trait Pokable: Send + Sync {
    /// Delay before the next poke. Read fresh before every sleep.
    fn poke_every(&self) -> Duration;

    /// Periodic work. Returning `true` stops the loop for good.
    /// Implementations own the synchronization of any state they share
    /// with request handling.
    async fn poke(&self) -> bool;
}

/// The pokable subset of `plugins`, in order.
pub fn pokable_plugins(plugins: &[Arc<dyn Plugin>]) -> Vec<Arc<dyn Pokable>> {
    plugins
        .iter()
        .filter_map(|p| Arc::clone(p).as_pokable())
        .collect()
}

/// The pokable subset of `services`, in order.
pub fn pokable_services<'a>(
    services: impl IntoIterator<Item = &'a Arc<dyn Service>>,
) -> Vec<Arc<dyn Pokable>> {
    services
        .into_iter()
        .filter_map(|s| Arc::clone(s).as_pokable())
        .collect()
}

/// Poke until the pokable asks to stop. Never returns otherwise.
pub async fn run_poke_worker(pokable: Arc<dyn Pokable>) {
    let mut ticks: u64 = 0;
    loop {
        tokio::time::sleep(pokable.poke_every()).await;
        ticks += 1;
        trace!(tick = ticks, "poke");
        if pokable.poke().await {
            debug!(ticks, "poke worker finished");
            break;
        }
    }
}
