//! Token-based session memory.
//!
//! Clients are identified by an opaque token sent in a header. Session data
//! lives in a [`Store`] under a key derived from the token's SHA-256 digest,
//! so the store never holds a usable token. Each stored session records when
//! it was last used; sessions idle for longer than the configured TTL are
//! pruned on every poke, including ones left behind by an earlier process.

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use super::{DEFAULT_MEMORY_NAME, DEFAULT_STORE_NAME, MemoryService, Service, Store};
use crate::engine::poke::Pokable;
use crate::request::Request;

/// Default header carrying the session token.
pub const DEFAULT_TOKEN_HEADER: &str = "X-Memory-Token";

/// Default idle time before a session is forgotten.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const KEY_PREFIX: &str = "session:";

/// What is stored per session.
#[derive(Debug, Serialize, Deserialize)]
struct Session {
    /// Last use, in milliseconds since the Unix epoch.
    seen: u64,
    data: Value,
}

impl Session {
    fn touched(data: Value) -> Self {
        Self {
            seen: now_millis(),
            data,
        }
    }

    /// `None` for values this service did not write.
    fn decode(value: Value) -> Option<Self> {
        serde_json::from_value(value).ok()
    }

    fn idle(&self) -> Duration {
        Duration::from_millis(now_millis().saturating_sub(self.seen))
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Built-in [`MemoryService`]. Needs a store service, `"store"` by default.
pub struct TokenMemory {
    name: String,
    header: String,
    store_name: String,
    ttl: Duration,
    prune_every: Duration,
    store: RwLock<Option<Arc<dyn Store>>>,
}

impl Default for TokenMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenMemory {
    pub fn new() -> Self {
        Self {
            name: DEFAULT_MEMORY_NAME.to_string(),
            header: DEFAULT_TOKEN_HEADER.to_string(),
            store_name: DEFAULT_STORE_NAME.to_string(),
            ttl: DEFAULT_SESSION_TTL,
            prune_every: Duration::from_secs(60),
            store: RwLock::new(None),
        }
    }

    /// A memory service registered under `name` instead of `"memory"`.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::new()
        }
    }

    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = header.into();
        self
    }

    pub fn with_store_name(mut self, store_name: impl Into<String>) -> Self {
        self.store_name = store_name.into();
        self
    }

    /// Forget sessions idle for longer than `ttl`, checking every `prune_every`.
    pub fn with_ttl(mut self, ttl: Duration, prune_every: Duration) -> Self {
        self.ttl = ttl;
        self.prune_every = prune_every;
        self
    }

    fn store(&self) -> Result<Arc<dyn Store>> {
        self.store
            .read()
            .map_err(|_| anyhow!("memory store lock poisoned"))?
            .clone()
            .ok_or_else(|| anyhow!("memory service '{}' has no store bound", self.name))
    }

    /// Load a live session and mark it as used.
    async fn resume(&self, store: &dyn Store, key: &str) -> Result<Option<Value>> {
        let Some(session) = store.get(key).await?.and_then(Session::decode) else {
            return Ok(None);
        };
        if session.idle() > self.ttl {
            return Ok(None);
        }
        save(store, key, session.data.clone()).await?;
        Ok(Some(session.data))
    }

    /// Whether the session under `key` is idle past the TTL, read fresh.
    async fn expired(&self, store: &dyn Store, key: &str) -> Result<bool> {
        Ok(match store.get(key).await? {
            Some(value) => Session::decode(value).is_none_or(|s| s.idle() > self.ttl),
            None => false,
        })
    }
}

async fn save(store: &dyn Store, key: &str, data: Value) -> Result<()> {
    store
        .set(key, serde_json::to_value(Session::touched(data))?)
        .await
}

/// Store key for a token.
fn session_key(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    format!("{KEY_PREFIX}{}", URL_SAFE_NO_PAD.encode(digest))
}

fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    URL_SAFE_NO_PAD.encode(bytes)
}

impl Service for TokenMemory {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_pokable(self: Arc<Self>) -> Option<Arc<dyn Pokable>> {
        Some(self)
    }

    fn as_memory(self: Arc<Self>) -> Option<Arc<dyn MemoryService>> {
        Some(self)
    }
}

#[async_trait]
impl MemoryService for TokenMemory {
    async fn token_for_request(&self, req: &Request) -> Result<String> {
        let store = self.store()?;

        if let Some(token) = req.header(&self.header).filter(|t| !t.is_empty()) {
            if self.resume(store.as_ref(), &session_key(token)).await?.is_some() {
                return Ok(token.to_string());
            }
        }

        let token = generate_token();
        save(store.as_ref(), &session_key(&token), Value::Null).await?;
        debug!("issued new session token");
        Ok(token)
    }

    async fn data_for_token(&self, token: &str) -> Result<Option<Value>> {
        if token.is_empty() {
            return Ok(None);
        }
        let store = self.store()?;
        self.resume(store.as_ref(), &session_key(token)).await
    }

    async fn set_data_for_token(&self, token: &str, data: Value) -> Result<()> {
        if token.is_empty() {
            bail!("cannot store session data without a token");
        }
        save(self.store()?.as_ref(), &session_key(token), data).await
    }

    fn token_header(&self) -> &str {
        &self.header
    }

    fn needed_store(&self) -> Option<&str> {
        Some(&self.store_name)
    }

    fn set_store(&self, store: Arc<dyn Service>) -> Result<()> {
        let name = store.name().to_string();
        let Some(store) = store.as_store() else {
            bail!("service '{name}' is not a key-value store");
        };
        *self
            .store
            .write()
            .map_err(|_| anyhow!("memory store lock poisoned"))? = Some(store);
        Ok(())
    }
}

#[async_trait]
impl Pokable for TokenMemory {
    fn poke_every(&self) -> Duration {
        self.prune_every
    }

    async fn poke(&self) -> bool {
        let Ok(store) = self.store() else {
            return false;
        };
        let keys = match store.keys(KEY_PREFIX).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "listing sessions failed");
                return false;
            }
        };

        let mut pruned = 0usize;
        for key in &keys {
            match self.expired(store.as_ref(), key).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(error = %e, "reading session failed");
                    continue;
                }
            }
            if store.remove(key).await.is_ok() {
                pruned += 1;
            }
        }
        if pruned > 0 {
            info!(pruned, "expired sessions pruned");
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::store::InMemoryStore;
    use axum::http::{HeaderMap, HeaderValue};
    use serde_json::json;

    fn bound() -> (TokenMemory, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let memory = TokenMemory::new();
        memory.set_store(store.clone()).unwrap();
        (memory, store)
    }

    fn request_with_token(token: &str) -> Request {
        let mut headers = HeaderMap::new();
        headers.insert("x-memory-token", HeaderValue::from_str(token).unwrap());
        Request::with_headers("hi", headers)
    }

    #[test]
    fn session_key_hides_token() {
        let key = session_key("secret-token");
        assert!(key.starts_with(KEY_PREFIX));
        assert!(!key.contains("secret-token"));
        assert_eq!(key, session_key("secret-token"));
    }

    #[test]
    fn tokens_are_unique_and_url_safe() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[tokio::test]
    async fn issues_token_when_header_missing() {
        let (memory, store) = bound();
        let token = memory.token_for_request(&Request::new("hi")).await.unwrap();
        assert!(!token.is_empty());
        assert_eq!(store.len().await, 1);
        assert_eq!(memory.data_for_token(&token).await.unwrap(), Some(Value::Null));
    }

    #[tokio::test]
    async fn known_token_is_kept() {
        let (memory, _store) = bound();
        let token = memory.token_for_request(&Request::new("hi")).await.unwrap();
        let again = memory
            .token_for_request(&request_with_token(&token))
            .await
            .unwrap();
        assert_eq!(again, token);
    }

    #[tokio::test]
    async fn unknown_token_is_replaced() {
        let (memory, _store) = bound();
        let token = memory
            .token_for_request(&request_with_token("forged"))
            .await
            .unwrap();
        assert_ne!(token, "forged");
    }

    #[tokio::test]
    async fn data_round_trips_per_token() {
        let (memory, _store) = bound();
        let token = memory.token_for_request(&Request::new("hi")).await.unwrap();
        memory.set_data_for_token(&token, json!(5)).await.unwrap();
        assert_eq!(memory.data_for_token(&token).await.unwrap(), Some(json!(5)));
        assert_eq!(memory.data_for_token("other").await.unwrap(), None);
        assert_eq!(memory.data_for_token("").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unbound_memory_errors() {
        let memory = TokenMemory::new();
        let err = memory.token_for_request(&Request::new("hi")).await.unwrap_err();
        assert!(err.to_string().contains("no store bound"));
    }

    #[test]
    fn rejects_non_store_service() {
        let memory = TokenMemory::new();
        let err = memory.set_store(Arc::new(TokenMemory::new())).unwrap_err();
        assert!(err.to_string().contains("not a key-value store"));
    }

    #[tokio::test]
    async fn poke_prunes_idle_sessions() {
        let store = Arc::new(InMemoryStore::new());
        let memory = TokenMemory::new().with_ttl(Duration::ZERO, Duration::from_millis(10));
        memory.set_store(store.clone()).unwrap();

        memory.token_for_request(&Request::new("hi")).await.unwrap();
        assert_eq!(store.len().await, 1);

        std::thread::sleep(Duration::from_millis(10));
        assert!(!memory.poke().await);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn sessions_carry_last_use() {
        let (memory, store) = bound();
        let token = memory.token_for_request(&Request::new("hi")).await.unwrap();
        memory.set_data_for_token(&token, json!(3)).await.unwrap();

        let stored = store.get(&session_key(&token)).await.unwrap().unwrap();
        assert_eq!(stored["data"], json!(3));
        assert!(stored["seen"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn stale_session_found_in_store_is_pruned() {
        let store = Arc::new(InMemoryStore::new());
        let stale = session_key("left-over");
        store
            .set(&stale, json!({ "seen": 0, "data": 4 }))
            .await
            .unwrap();
        store.set("unrelated", json!(1)).await.unwrap();

        let memory = TokenMemory::new();
        assert!(!memory.poke().await);

        memory.set_store(store.clone()).unwrap();
        assert_eq!(memory.data_for_token("left-over").await.unwrap(), None);
        assert!(!memory.poke().await);
        assert!(store.get(&stale).await.unwrap().is_none());
        assert_eq!(store.get("unrelated").await.unwrap(), Some(json!(1)));
    }

    #[tokio::test]
    async fn session_in_use_survives_poke() {
        let store = Arc::new(InMemoryStore::new());
        let memory = TokenMemory::new().with_ttl(Duration::from_secs(60), Duration::from_secs(1));
        memory.set_store(store.clone()).unwrap();

        let token = memory.token_for_request(&Request::new("hi")).await.unwrap();
        let stale = session_key("other");
        store
            .set(&stale, json!({ "seen": 0, "data": null }))
            .await
            .unwrap();

        assert!(!memory.poke().await);
        assert_eq!(memory.data_for_token(&token).await.unwrap(), Some(Value::Null));
        assert!(store.get(&stale).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_session_is_pruned() {
        let (memory, store) = bound();
        let key = session_key("garbled");
        store.set(&key, json!("not a session")).await.unwrap();

        assert_eq!(memory.data_for_token("garbled").await.unwrap(), None);
        memory.poke().await;
        assert!(store.get(&key).await.unwrap().is_none());
    }

    #[test]
    fn declares_store_and_header() {
        let memory = TokenMemory::new()
            .with_header("X-Session")
            .with_store_name("sessions");
        assert_eq!(memory.token_header(), "X-Session");
        assert_eq!(memory.needed_store(), Some("sessions"));
    }
}
