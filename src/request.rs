use axum::http::HeaderMap;

/// One call into the engine. Owned by that call and dropped when it ends.
#[derive(Debug, Clone, Default)]
pub struct Request {
    /// Trimmed input text.
    pub text: String,
    /// Headers of the transport request that carried the text. Read-only for plugins.
    pub headers: HeaderMap,
    /// Session token. Empty on a first visit; whatever is left here is sent
    /// back to the client, so memory-aware plugins overwrite it with a fresh
    /// token when they issue one.
    pub token: String,
}

impl Request {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_headers(text: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            text: text.into(),
            headers,
            token: String::new(),
        }
    }

    /// Value of a header as UTF-8, if present and valid.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}
