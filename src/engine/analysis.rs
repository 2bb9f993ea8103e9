use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::plugin::{Metadata, Plugin, Score};
use crate::request::Request;

/// One plugin's verdict on a request, ready for ranking.
pub struct AnalysisResult {
    pub score: f64,
    pub exact_match: bool,
    pub precedence: i32,
    pub name: String,
    pub metadata: Metadata,
}

impl AnalysisResult {
    pub fn new(
        score: f64,
        exact_match: bool,
        precedence: i32,
        name: impl Into<String>,
        metadata: Metadata,
    ) -> Self {
        Self {
            score,
            exact_match,
            precedence,
            name: name.into(),
            metadata,
        }
    }

    fn from_plugin(plugin: &dyn Plugin, score: Score, metadata: Metadata) -> Self {
        Self::new(
            score.score(),
            score.is_exact_match(),
            plugin.precedence(),
            plugin.name(),
            metadata,
        )
    }
}

impl fmt::Debug for AnalysisResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisResult")
            .field("score", &self.score)
            .field("exact_match", &self.exact_match)
            .field("precedence", &self.precedence)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// NaN ranks below every real score.
fn rank_key(score: f64) -> f64 {
    if score.is_nan() {
        f64::NEG_INFINITY
    } else {
        score
    }
}

/// Rank results best-first.
///
/// Three stable passes, each over the previous pass's output: precedence,
/// then score, then exact match. The last pass dominates, so the final order
/// is exact match first, then higher score, then higher precedence, with
/// full ties left in their original order.
pub fn sort_results(results: &mut [AnalysisResult]) {
    results.sort_by(|a, b| b.precedence.cmp(&a.precedence));
    results.sort_by(|a, b| rank_key(b.score).total_cmp(&rank_key(a.score)));
    results.sort_by(|a, b| match (a.exact_match, b.exact_match) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => Ordering::Equal,
    });
}

/// The winner of `results`, or `None` when there is nothing to rank.
pub fn best_result(mut results: Vec<AnalysisResult>) -> Option<AnalysisResult> {
    sort_results(&mut results);
    results.into_iter().next()
}

/// Ask every plugin to analyze `req`. Output order matches `plugins`.
pub async fn analyze_all(plugins: &[Arc<dyn Plugin>], req: &Request) -> Vec<AnalysisResult> {
    let analyses = plugins.iter().map(|plugin| async move {
        let (score, metadata) = plugin.analyze(req).await;
        AnalysisResult::from_plugin(plugin.as_ref(), score, metadata)
    });
    futures::future::join_all(analyses).await
}
