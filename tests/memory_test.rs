use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request as HttpRequest, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use trevor::config::ServerConfig;
use trevor::engine::Engine;
use trevor::engine::poke::Pokable;
use trevor::plugin::Plugin;
use trevor::plugin::visits::VisitsPlugin;
use trevor::request::Request;
use trevor::server::build_router;
use trevor::service::memory::TokenMemory;
use trevor::service::sqlite::SqliteStore;
use trevor::service::{DEFAULT_MEMORY_NAME, MemoryService, Service, Store};

/// Memory service handing out predictable tokens: `token_1`, `token_2`, ...
#[derive(Default)]
struct CountingMemory {
    sessions: Mutex<HashMap<String, Value>>,
}

impl Service for CountingMemory {
    fn name(&self) -> &str {
        DEFAULT_MEMORY_NAME
    }

    fn as_memory(self: Arc<Self>) -> Option<Arc<dyn MemoryService>> {
        Some(self)
    }
}

#[async_trait]
impl MemoryService for CountingMemory {
    async fn token_for_request(&self, req: &Request) -> Result<String> {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(token) = req.header(self.token_header()) {
            if sessions.contains_key(token) {
                return Ok(token.to_string());
            }
        }
        let token = format!("token_{}", sessions.len() + 1);
        sessions.insert(token.clone(), Value::Null);
        Ok(token)
    }

    async fn data_for_token(&self, token: &str) -> Result<Option<Value>> {
        let data = self.sessions.lock().unwrap().get(token).cloned();
        // Give other requests a chance to run between read and write.
        tokio::task::yield_now().await;
        Ok(data)
    }

    async fn set_data_for_token(&self, token: &str, data: Value) -> Result<()> {
        self.sessions.lock().unwrap().insert(token.to_string(), data);
        Ok(())
    }

    fn token_header(&self) -> &str {
        "x-test-token"
    }

    fn needed_store(&self) -> Option<&str> {
        None
    }

    fn set_store(&self, _store: Arc<dyn Service>) -> Result<()> {
        Ok(())
    }
}

fn visits_router() -> Router {
    let mut engine = Engine::new();
    engine
        .set_services(vec![Arc::new(CountingMemory::default())])
        .unwrap();
    engine
        .set_plugins(vec![Box::new(VisitsPlugin::new().with_score(10.0))])
        .unwrap();
    build_router(Arc::new(engine), &ServerConfig::default()).unwrap()
}

/// POST `text`, optionally with a token. Returns the reply data and token.
async fn visit(router: &Router, token: Option<&str>) -> (Value, String) {
    let mut builder = HttpRequest::builder()
        .method("POST")
        .uri("/process")
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("x-test-token", token);
    }
    let request = builder
        .body(Body::from(json!({ "text": "hello" }).to_string()))
        .unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let token = response
        .headers()
        .get("x-test-token")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["type"], "visits");
    (body["data"].clone(), token)
}

#[tokio::test]
async fn visits_are_counted_per_token() {
    let router = visits_router();

    let (data, first) = visit(&router, None).await;
    assert_eq!(data, "hello new visitor");
    assert_eq!(first, "token_1");

    let (data, token) = visit(&router, Some(first.as_str())).await;
    assert_eq!(data, "visit number 1");
    assert_eq!(token, "token_1");

    let (data, _) = visit(&router, Some(first.as_str())).await;
    assert_eq!(data, "visit number 2");

    let (data, second) = visit(&router, None).await;
    assert_eq!(data, "hello new visitor");
    assert_eq!(second, "token_2");

    let (data, token) = visit(&router, Some(first.as_str())).await;
    assert_eq!(data, "visit number 3");
    assert_eq!(token, "token_1");
}

#[tokio::test]
async fn unknown_token_starts_a_new_session() {
    let router = visits_router();

    let (data, token) = visit(&router, Some("made-up")).await;
    assert_eq!(data, "hello new visitor");
    assert_eq!(token, "token_1");
}

fn sqlite_engine() -> Engine {
    let services: Vec<Arc<dyn Service>> = vec![
        Arc::new(SqliteStore::in_memory().unwrap()),
        Arc::new(TokenMemory::new()),
    ];
    let mut engine = Engine::new();
    engine.set_services(services).unwrap();
    let plugins: Vec<Box<dyn Plugin>> = vec![Box::new(VisitsPlugin::new())];
    engine.set_plugins(plugins).unwrap();
    engine
}

#[tokio::test]
async fn token_memory_keeps_sessions_in_sqlite() {
    let engine = sqlite_engine();

    let mut req = Request::new("hello");
    let out = engine.process(&mut req).await.unwrap();
    assert_eq!(out.data, json!("hello new visitor"));
    let token = req.token.clone();
    assert_eq!(token.len(), 43);

    for expected in ["visit number 1", "visit number 2"] {
        let mut req = Request::new("hello");
        req.token = token.clone();
        let out = engine.process(&mut req).await.unwrap();
        assert_eq!(out.data, json!(expected));
        assert_eq!(req.token, token);
    }

    let mut stranger = Request::new("hello");
    let out = engine.process(&mut stranger).await.unwrap();
    assert_eq!(out.data, json!("hello new visitor"));
    assert_ne!(stranger.token, token);

    let memory = engine.memory().unwrap();
    assert_eq!(memory.data_for_token(&token).await.unwrap(), Some(json!(2)));
}

#[tokio::test]
async fn sessions_from_an_earlier_run_expire() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.db");
    let path = path.to_str().unwrap();

    let token = {
        let memory = TokenMemory::new();
        memory
            .set_store(Arc::new(SqliteStore::open(path).unwrap()))
            .unwrap();
        let token = memory.token_for_request(&Request::new("hi")).await.unwrap();
        memory.set_data_for_token(&token, json!(1)).await.unwrap();
        token
    };

    let store = Arc::new(SqliteStore::open(path).unwrap());
    let restarted = TokenMemory::new().with_ttl(Duration::ZERO, Duration::from_millis(1));
    restarted.set_store(store.clone()).unwrap();

    std::thread::sleep(Duration::from_millis(10));
    restarted.poke().await;

    assert_eq!(restarted.data_for_token(&token).await.unwrap(), None);
    assert!(store.keys("session:").await.unwrap().is_empty());
}

#[tokio::test]
async fn sessions_from_an_earlier_run_are_resumed_within_ttl() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.db");
    let path = path.to_str().unwrap();

    let token = {
        let memory = TokenMemory::new();
        memory
            .set_store(Arc::new(SqliteStore::open(path).unwrap()))
            .unwrap();
        let token = memory.token_for_request(&Request::new("hi")).await.unwrap();
        memory.set_data_for_token(&token, json!(5)).await.unwrap();
        token
    };

    let restarted = TokenMemory::new();
    restarted
        .set_store(Arc::new(SqliteStore::open(path).unwrap()))
        .unwrap();
    restarted.poke().await;

    assert_eq!(
        restarted.data_for_token(&token).await.unwrap(),
        Some(json!(5))
    );
}

#[tokio::test]
async fn parallel_visits_are_all_counted() {
    let mut engine = Engine::new();
    engine
        .set_services(vec![Arc::new(CountingMemory::default())])
        .unwrap();
    engine
        .set_plugins(vec![Box::new(VisitsPlugin::new())])
        .unwrap();

    let mut first = Request::new("hello");
    engine.process(&mut first).await.unwrap();
    let token = first.token;

    let visits = (0..20).map(|_| {
        let mut req = Request::new("hello");
        req.token = token.clone();
        let engine = &engine;
        async move { engine.process(&mut req).await.unwrap() }
    });
    futures::future::join_all(visits).await;

    let memory = engine.memory().unwrap();
    assert_eq!(memory.data_for_token(&token).await.unwrap(), Some(json!(20)));
}
