pub mod analysis;
pub mod poke;

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::middleware::{Middleware, Next, Services};
use crate::plugin::{Metadata, Plugin};
use crate::request::Request;
use crate::service::{MemoryService, Service};
use analysis::{analyze_all, best_result};
use poke::{pokable_plugins, pokable_services, run_poke_worker};

/// Picks the plugin for a request directly, skipping per-plugin analysis.
pub type Analyzer = Box<dyn Fn(&Request) -> (String, Metadata) + Send + Sync>;

/// Misconfiguration detected while registering plugins or services.
/// Fatal: the server must not start with any of these.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("plugin '{plugin}' needs service '{service}', which is not registered")]
    UnknownService { plugin: String, service: String },

    #[error("memory service '{memory}' needs store '{store}', which is not registered")]
    MissingStore { memory: String, store: String },

    #[error("memory service '{memory}' rejected store '{store}': {error:#}")]
    StoreRejected {
        memory: String,
        store: String,
        error: anyhow::Error,
    },

    #[error("only one memory service may be registered, found '{first}' and '{second}'")]
    AmbiguousMemory { first: String, second: String },
}

/// Why a request could not be processed.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no plugins found. can't process anything")]
    NoPlugins,

    #[error("analyzer chose plugin '{0}', which is not registered")]
    UnknownPlugin(String),

    /// The selected plugin failed. The message is the plugin's own.
    #[error("{error:#}")]
    Plugin { plugin: String, error: anyhow::Error },
}

/// What the selected plugin produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Processed {
    pub plugin: String,
    pub data: Value,
}

/// Holds the plugins and services and routes each request to one plugin.
///
/// Configure with the `set_*` methods during startup, then share behind an
/// `Arc` and call [`process`](Engine::process) from as many tasks as needed.
#[derive(Default)]
pub struct Engine {
    plugins: Vec<Arc<dyn Plugin>>,
    index: HashMap<String, usize>,
    services: HashMap<String, Arc<dyn Service>>,
    memory: Option<Arc<dyn MemoryService>>,
    analyzer: Option<Analyzer>,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the plugins, replacing any previous set.
    ///
    /// Plugins are ordered by descending precedence (ties keep their given
    /// order) and injected with the services they ask for, so services must
    /// be registered first.
    pub fn set_plugins(&mut self, mut plugins: Vec<Box<dyn Plugin>>) -> Result<(), ConfigError> {
        plugins.sort_by(|a, b| b.precedence().cmp(&a.precedence()));

        for plugin in plugins.iter_mut() {
            let name = plugin.name().to_string();
            let Some(injectable) = plugin.as_injectable() else {
                continue;
            };
            let needed: Vec<String> = injectable
                .needed_services()
                .iter()
                .map(|s| s.to_string())
                .collect();
            for service_name in needed {
                let service = self.services.get(&service_name).cloned().ok_or_else(|| {
                    ConfigError::UnknownService {
                        plugin: name.clone(),
                        service: service_name.clone(),
                    }
                })?;
                debug!(plugin = %name, service = %service_name, "injecting service");
                injectable.set_service(&service_name, service);
            }
        }

        self.plugins = plugins.into_iter().map(Arc::from).collect();
        self.index = self
            .plugins
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name().to_string(), i))
            .collect();

        info!(count = self.plugins.len(), "plugins registered");
        Ok(())
    }

    /// Add services to the registry. A name already present is overwritten.
    ///
    /// Afterwards the memory service, if one is registered, gets its store.
    pub fn set_services(&mut self, services: Vec<Arc<dyn Service>>) -> Result<(), ConfigError> {
        for service in services {
            let name = service.name().to_string();
            debug!(service = %name, "registering service");
            self.services.insert(name, service);
        }
        info!(count = self.services.len(), "services registered");
        self.bind_memory()
    }

    fn bind_memory(&mut self) -> Result<(), ConfigError> {
        let mut names: Vec<&String> = self.services.keys().collect();
        names.sort();

        let mut found: Option<(String, Arc<dyn MemoryService>)> = None;
        for name in names {
            let Some(memory) = Arc::clone(&self.services[name]).as_memory() else {
                continue;
            };
            if let Some((first, _)) = &found {
                return Err(ConfigError::AmbiguousMemory {
                    first: first.clone(),
                    second: name.clone(),
                });
            }
            found = Some((name.clone(), memory));
        }

        let Some((name, memory)) = found else {
            self.memory = None;
            return Ok(());
        };

        if let Some(store_name) = memory.needed_store() {
            let store = self.services.get(store_name).cloned().ok_or_else(|| {
                ConfigError::MissingStore {
                    memory: name.clone(),
                    store: store_name.to_string(),
                }
            })?;
            memory
                .set_store(store)
                .map_err(|error| ConfigError::StoreRejected {
                    memory: name.clone(),
                    store: store_name.to_string(),
                    error,
                })?;
            debug!(memory = %name, store = %store_name, "memory store bound");
        }

        info!(memory = %name, header = memory.token_header(), "memory service bound");
        self.memory = Some(memory);
        Ok(())
    }

    /// Route every request to `analyzer`'s choice instead of ranking plugins.
    pub fn set_analyzer<F>(&mut self, analyzer: F)
    where
        F: Fn(&Request) -> (String, Metadata) + Send + Sync + 'static,
    {
        self.analyzer = Some(Box::new(analyzer));
    }

    /// Replace the middleware chain. The first entry is the outermost layer.
    pub fn set_middleware(&mut self, middleware: Vec<Arc<dyn Middleware>>) {
        self.middleware = middleware;
    }

    /// Pick a plugin for `req` and let it process the request through the
    /// middleware chain. Plugin errors come back unchanged; there is no
    /// retry and no fallback to the runner-up.
    pub async fn process(&self, req: &mut Request) -> Result<Processed, EngineError> {
        if self.plugins.is_empty() {
            return Err(EngineError::NoPlugins);
        }

        let (plugin, metadata) = match &self.analyzer {
            Some(analyzer) => {
                let (name, metadata) = analyzer(&*req);
                let plugin = self
                    .plugin(&name)
                    .ok_or(EngineError::UnknownPlugin(name))?;
                (plugin, metadata)
            }
            None => {
                let results = analyze_all(&self.plugins, req).await;
                let best = best_result(results).ok_or(EngineError::NoPlugins)?;
                debug!(
                    plugin = %best.name,
                    score = best.score,
                    exact_match = best.exact_match,
                    "plugin selected"
                );
                let plugin = self
                    .plugin(&best.name)
                    .ok_or_else(|| EngineError::UnknownPlugin(best.name.clone()))?;
                (plugin, best.metadata)
            }
        };

        let services = Services::new(&self.services);
        Next::new(&self.middleware, services, plugin.as_ref(), metadata)
            .run(req)
            .await
    }

    /// The bound memory service, if any.
    pub fn memory(&self) -> Option<Arc<dyn MemoryService>> {
        self.memory.clone()
    }

    pub fn plugin(&self, name: &str) -> Option<&Arc<dyn Plugin>> {
        self.index.get(name).map(|&i| &self.plugins[i])
    }

    /// Registered plugins, highest precedence first.
    pub fn plugins(&self) -> &[Arc<dyn Plugin>] {
        &self.plugins
    }

    pub fn service(&self, name: &str) -> Option<&Arc<dyn Service>> {
        self.services.get(name)
    }

    /// Registered service names, sorted.
    pub fn service_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.services.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Start one background poke loop per pokable plugin and service.
    ///
    /// Returns at once. Dropping the handles detaches the loops; they then
    /// live until their pokable asks to stop or the runtime shuts down.
    pub fn schedule_pokes(&self) -> Vec<JoinHandle<()>> {
        let mut pokables = pokable_plugins(&self.plugins);
        pokables.extend(pokable_services(self.services.values()));

        info!(count = pokables.len(), "scheduling poke workers");
        pokables
            .into_iter()
            .map(|pokable| tokio::spawn(run_poke_worker(pokable)))
            .collect()
    }
}
