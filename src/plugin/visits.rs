use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{Injectable, Metadata, Plugin, Score};
use crate::request::Request;
use crate::service::{DEFAULT_MEMORY_NAME, MemoryService, Service};

/// Counts how often each client came back. Needs the memory service.
///
/// With no triggers configured it claims every request; otherwise only
/// requests mentioning one of the trigger words.
///
/// Counting is serialized across requests so parallel visits with the same
/// token are never lost.
pub struct VisitsPlugin {
    score: f64,
    triggers: Vec<String>,
    memory: Option<Arc<dyn MemoryService>>,
    counting: Mutex<()>,
}

impl Default for VisitsPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl VisitsPlugin {
    pub fn new() -> Self {
        Self {
            score: 1.0,
            triggers: Vec::new(),
            memory: None,
            counting: Mutex::new(()),
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }

    pub fn with_triggers<I, S>(mut self, triggers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.triggers = triggers
            .into_iter()
            .map(|t| t.into().to_lowercase())
            .collect();
        self
    }

    fn triggered(&self, text: &str) -> bool {
        self.triggers.is_empty()
            || text
                .split(|c: char| !c.is_alphanumeric())
                .any(|w| self.triggers.iter().any(|t| t.eq_ignore_ascii_case(w)))
    }
}

#[async_trait]
impl Plugin for VisitsPlugin {
    fn name(&self) -> &str {
        "visits"
    }

    fn precedence(&self) -> i32 {
        1
    }

    async fn analyze(&self, req: &Request) -> (Score, Metadata) {
        if self.triggered(&req.text) {
            (Score::new(self.score, false), None)
        } else {
            (Score::zero(), None)
        }
    }

    async fn process(&self, req: &mut Request, _metadata: Metadata) -> Result<Value> {
        let memory = self
            .memory
            .as_ref()
            .ok_or_else(|| anyhow!("visits plugin has no memory service"))?;
        let _counting = self.counting.lock().await;

        if let Some(data) = memory.data_for_token(&req.token).await? {
            let count = data.as_u64().unwrap_or(0) + 1;
            memory.set_data_for_token(&req.token, json!(count)).await?;
            return Ok(json!(format!("visit number {count}")));
        }

        req.token = memory.token_for_request(req).await?;
        memory.set_data_for_token(&req.token, json!(0)).await?;
        Ok(json!("hello new visitor"))
    }

    fn as_injectable(&mut self) -> Option<&mut dyn Injectable> {
        Some(self)
    }
}

impl Injectable for VisitsPlugin {
    fn needed_services(&self) -> &[&str] {
        &[DEFAULT_MEMORY_NAME]
    }

    fn set_service(&mut self, name: &str, service: Arc<dyn Service>) {
        if name == DEFAULT_MEMORY_NAME {
            self.memory = service.as_memory();
        }
    }
}
