//! Canned replies for known phrases.
//!
//! A request equal to a phrase (case and surrounding whitespace ignored) is
//! an exact match. Otherwise the plugin reports the best fraction of a
//! phrase's words found in the request, which loses to any exact match.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use super::{Metadata, Plugin, Score};
use crate::request::Request;

/// Score reported for an exact phrase match.
const EXACT_SCORE: f64 = 10.0;

struct Phrase {
    normalized: String,
    words: HashSet<String>,
    reply: String,
}

/// Answers known phrases from a fixed table.
pub struct PhrasePlugin {
    name: String,
    precedence: i32,
    phrases: Vec<Phrase>,
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

impl PhrasePlugin {
    pub fn new<I, P, R>(name: impl Into<String>, precedence: i32, phrases: I) -> Self
    where
        I: IntoIterator<Item = (P, R)>,
        P: AsRef<str>,
        R: Into<String>,
    {
        let phrases = phrases
            .into_iter()
            .map(|(phrase, reply)| Phrase {
                normalized: normalize(phrase.as_ref()),
                words: words(phrase.as_ref()),
                reply: reply.into(),
            })
            .collect();
        Self {
            name: name.into(),
            precedence,
            phrases,
        }
    }

    /// Small-talk table registered as `"salute"`.
    pub fn greetings() -> Self {
        Self::new(
            "salute",
            2,
            [
                ("how are you?", "fine, and you?"),
                ("hello", "hello there!"),
                ("hi", "hi!"),
                ("good morning", "good morning to you too"),
                ("thank you", "you're welcome"),
            ],
        )
    }

    /// Load a `{ "phrase": "reply", ... }` JSON object.
    pub fn from_json_file(name: impl Into<String>, precedence: i32, path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read phrases from {}", path.display()))?;
        let table: BTreeMap<String, String> = serde_json::from_str(&raw)
            .with_context(|| format!("{} is not a JSON object of strings", path.display()))?;
        Ok(Self::new(name, precedence, table))
    }

    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    /// Index and score of the best phrase for `text`.
    fn best_match(&self, text: &str) -> Option<(usize, Score)> {
        let normalized = normalize(text);
        if let Some(i) = self.phrases.iter().position(|p| p.normalized == normalized) {
            return Some((i, Score::exact(EXACT_SCORE)));
        }

        let input = words(text);
        self.phrases
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.words.is_empty())
            .map(|(i, p)| {
                let hits = p.words.intersection(&input).count();
                (i, hits as f64 / p.words.len() as f64)
            })
            .filter(|(_, ratio)| *ratio > 0.0)
            .fold(None, |best: Option<(usize, f64)>, (i, ratio)| match best {
                Some((_, top)) if top >= ratio => best,
                _ => Some((i, ratio)),
            })
            .map(|(i, ratio)| (i, Score::new(ratio, false)))
    }
}

#[async_trait]
impl Plugin for PhrasePlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn precedence(&self) -> i32 {
        self.precedence
    }

    async fn analyze(&self, req: &Request) -> (Score, Metadata) {
        match self.best_match(&req.text) {
            Some((index, score)) => {
                let metadata: Metadata = Some(Box::new(index));
                (score, metadata)
            }
            None => (Score::zero(), None),
        }
    }

    async fn process(&self, req: &mut Request, metadata: Metadata) -> Result<Value> {
        let index = match metadata.and_then(|m| m.downcast::<usize>().ok()) {
            Some(index) => *index,
            None => self
                .best_match(&req.text)
                .map(|(i, _)| i)
                .ok_or_else(|| anyhow!("no known phrase in '{}'", req.text))?,
        };
        let phrase = self
            .phrases
            .get(index)
            .ok_or_else(|| anyhow!("phrase {index} out of range"))?;
        Ok(Value::String(phrase.reply.clone()))
    }
}
