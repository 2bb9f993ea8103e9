//! Settings for the HTTP front end.

use crate::consts::{DEFAULT_ENDPOINT, DEFAULT_HOST, DEFAULT_INPUT_FIELD, DEFAULT_PORT};

/// Where and how the engine is exposed over HTTP.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Path segment of the processing endpoint, e.g. `get_data`.
    pub endpoint: String,
    /// JSON key of the request body holding the text.
    pub input_field: String,
    /// Comma-separated CORS origins, `*` for any. `None` disables CORS.
    pub cors_origin: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            input_field: DEFAULT_INPUT_FIELD.to_string(),
            cors_origin: None,
        }
    }
}

impl ServerConfig {
    /// `host:port`, ready for binding.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Route path of the endpoint. Blank endpoints fall back to the default.
    pub fn endpoint_path(&self) -> String {
        let endpoint = self.endpoint.trim().trim_matches('/');
        if endpoint.is_empty() {
            format!("/{DEFAULT_ENDPOINT}")
        } else {
            format!("/{endpoint}")
        }
    }

    /// Input field name. Blank names fall back to the default.
    pub fn input_field(&self) -> &str {
        match self.input_field.trim() {
            "" => DEFAULT_INPUT_FIELD,
            field => field,
        }
    }

    /// Configured CORS origins, trimmed, empties dropped.
    pub fn cors_origins(&self) -> Vec<&str> {
        self.cors_origin
            .as_deref()
            .map(|o| {
                o.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}
