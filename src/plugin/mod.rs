//! Plugins score incoming text and turn the winning text into a response.
//!
//! The engine asks every [`Plugin`] to [`analyze`](Plugin::analyze) a request,
//! ranks the returned [`Score`]s, and hands the request to the winner's
//! [`process`](Plugin::process). Optional behavior is opted into through
//! capability queries: [`Plugin::as_injectable`] for service injection and
//! [`Plugin::as_pokable`] for periodic background work.

pub mod echo;
pub mod phrases;
pub mod visits;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;

use crate::engine::poke::Pokable;
use crate::request::Request;
use crate::service::Service;

/// Opaque analysis output, handed back verbatim to the winner's `process`.
pub type Metadata = Option<Box<dyn Any + Send + Sync>>;

/// How well a plugin matches a request. Only relative order matters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    score: f64,
    exact_match: bool,
}

impl Score {
    pub fn new(score: f64, exact_match: bool) -> Self {
        Self { score, exact_match }
    }

    /// A high-confidence, deterministic match.
    pub fn exact(score: f64) -> Self {
        Self::new(score, true)
    }

    /// No match at all.
    pub fn zero() -> Self {
        Self::new(0.0, false)
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn is_exact_match(&self) -> bool {
        self.exact_match
    }
}

/// A unit of text analysis and processing.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Static priority, used to break ties between equal scores.
    fn precedence(&self) -> i32;

    /// Score the request. Must not rely on state shared with other plugins.
    async fn analyze(&self, req: &Request) -> (Score, Metadata);

    /// Produce the response data. Errors go back to the caller untouched.
    async fn process(&self, req: &mut Request, metadata: Metadata) -> Result<Value>;

    /// Plugins that need services return themselves here.
    fn as_injectable(&mut self) -> Option<&mut dyn Injectable> {
        None
    }

    /// Plugins that need periodic upkeep return themselves here.
    fn as_pokable(self: Arc<Self>) -> Option<Arc<dyn Pokable>> {
        None
    }
}

/// A plugin that declares services it depends on.
///
/// Every name returned by [`needed_services`](Injectable::needed_services)
/// must be registered before the plugin is, or registration fails.
pub trait Injectable {
    fn needed_services(&self) -> &[&str];
    fn set_service(&mut self, name: &str, service: Arc<dyn Service>);
}
