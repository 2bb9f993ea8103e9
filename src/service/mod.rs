//! Named shared dependencies that plugins, middleware, and the HTTP shell use.
//!
//! A [`Service`] only has to report its name. Everything else is a
//! capability the engine queries explicitly: [`Service::as_pokable`],
//! [`Service::as_memory`], and [`Service::as_store`].

pub mod memory;
pub mod sqlite;
pub mod store;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;

use crate::engine::poke::Pokable;
use crate::request::Request;

/// Name of the store service the built-in memory service asks for.
pub const DEFAULT_STORE_NAME: &str = "store";

/// Name the built-in memory service registers under.
pub const DEFAULT_MEMORY_NAME: &str = "memory";

/// Lets callers recover the concrete type behind a `dyn Service`.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A named dependency injected into plugins.
pub trait Service: AsAny + Send + Sync {
    fn name(&self) -> &str;

    fn as_pokable(self: Arc<Self>) -> Option<Arc<dyn Pokable>> {
        None
    }

    fn as_memory(self: Arc<Self>) -> Option<Arc<dyn MemoryService>> {
        None
    }

    fn as_store(self: Arc<Self>) -> Option<Arc<dyn Store>> {
        None
    }
}

impl dyn Service {
    /// Borrow the service as its concrete type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// Token-based session management. At most one registered service plays
/// this role; the engine binds its store at configuration time.
#[async_trait]
pub trait MemoryService: Send + Sync {
    /// Token identifying the caller of `req`. Issues a fresh one when the
    /// request carries none or an unknown one.
    async fn token_for_request(&self, req: &Request) -> Result<String>;

    /// Session data for a token. `None` when the token is unknown.
    async fn data_for_token(&self, token: &str) -> Result<Option<Value>>;

    async fn set_data_for_token(&self, token: &str, data: Value) -> Result<()>;

    /// Header used to receive and send the token.
    fn token_header(&self) -> &str;

    /// Name of the store service this memory needs, if any.
    fn needed_store(&self) -> Option<&str>;

    /// Errors when `store` is not usable as this memory's backing store.
    fn set_store(&self, store: Arc<dyn Service>) -> Result<()>;
}

/// Key-value persistence behind a memory service.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;

    /// Every key starting with `prefix`, in no particular order.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}
