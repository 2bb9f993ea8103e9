use async_trait::async_trait;
use std::time::Instant;
use tracing::{info, warn};

use super::{Middleware, Next, Services};
use crate::engine::{EngineError, Processed};
use crate::request::Request;

/// Logs which plugin handled each request, how it went, and how long it took.
pub struct TraceMiddleware;

#[async_trait]
impl Middleware for TraceMiddleware {
    async fn handle(
        &self,
        req: &mut Request,
        _services: Services<'_>,
        next: Next<'_>,
    ) -> Result<Processed, EngineError> {
        let plugin = next.plugin().to_string();
        let chars = req.text.chars().count();
        let started = Instant::now();

        let result = next.run(req).await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => info!(%plugin, chars, elapsed_ms, "processed"),
            Err(e) => warn!(%plugin, chars, elapsed_ms, error = %e, "processing failed"),
        }
        result
    }
}
