use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use super::{Metadata, Plugin, Score};
use crate::request::Request;

/// Catch-all: never scores, answers with the text it was given.
pub struct EchoPlugin;

#[async_trait]
impl Plugin for EchoPlugin {
    fn name(&self) -> &str {
        "echo"
    }

    fn precedence(&self) -> i32 {
        0
    }

    async fn analyze(&self, _req: &Request) -> (Score, Metadata) {
        (Score::zero(), None)
    }

    async fn process(&self, req: &mut Request, _metadata: Metadata) -> Result<Value> {
        Ok(Value::String(req.text.clone()))
    }
}
