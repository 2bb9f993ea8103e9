//! Layers wrapped around plugin processing.
//!
//! Middleware nest like an onion: with `[a, b, c]` registered, the code
//! each one runs before [`Next::run`] executes in the order a, b, c and the
//! code after it in the order c, b, a. The innermost call is the selected
//! plugin's `process`.

pub mod trace;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::{EngineError, Processed};
use crate::plugin::{Metadata, Plugin};
use crate::request::Request;
use crate::service::Service;

/// A wrapper around request processing.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(
        &self,
        req: &mut Request,
        services: Services<'_>,
        next: Next<'_>,
    ) -> Result<Processed, EngineError>;
}

/// Read access to the engine's service registry.
#[derive(Clone, Copy)]
pub struct Services<'a> {
    registry: &'a HashMap<String, Arc<dyn Service>>,
}

impl<'a> Services<'a> {
    pub(crate) fn new(registry: &'a HashMap<String, Arc<dyn Service>>) -> Self {
        Self { registry }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.registry.get(name).cloned()
    }
}

/// The rest of the chain, ending in the selected plugin.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    services: Services<'a>,
    plugin: &'a dyn Plugin,
    metadata: Metadata,
}

impl<'a> Next<'a> {
    pub(crate) fn new(
        chain: &'a [Arc<dyn Middleware>],
        services: Services<'a>,
        plugin: &'a dyn Plugin,
        metadata: Metadata,
    ) -> Self {
        Self {
            chain,
            services,
            plugin,
            metadata,
        }
    }

    /// Name of the plugin at the end of the chain.
    pub fn plugin(&self) -> &str {
        self.plugin.name()
    }

    /// Run the remaining layers and the plugin.
    pub async fn run(self, req: &mut Request) -> Result<Processed, EngineError> {
        match self.chain.split_first() {
            Some((layer, rest)) => {
                let services = self.services;
                let next = Next::new(rest, services, self.plugin, self.metadata);
                layer.handle(req, services, next).await
            }
            None => {
                let plugin = self.plugin.name().to_string();
                match self.plugin.process(req, self.metadata).await {
                    Ok(data) => Ok(Processed { plugin, data }),
                    Err(error) => Err(EngineError::Plugin { plugin, error }),
                }
            }
        }
    }
}
