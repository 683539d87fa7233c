use std::collections::BTreeMap;
use std::time::Duration;

use crate::url::DEFAULT_BASE_URL;

/// Default model identifier sent to the server.
pub const DEFAULT_MODEL: &str = "mlx-community/Qwen2.5-Coder-1.5B-Instruct-4bit";

/// Transport configuration for chat completion requests.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpBackendConfig {
    /// Base URL of the server (`http://host:port/v1`).
    pub base_url: String,
    /// Model identifier sent in every request.
    pub model: String,
    /// Optional bearer token, for servers placed behind an auth proxy.
    pub api_key: Option<String>,
    /// Optional sampling temperature; the server default applies when unset.
    pub temperature: Option<f32>,
    /// Optional request timeout.
    pub timeout: Option<Duration>,
    /// Additional headers merged into request headers.
    pub extra_headers: BTreeMap<String, String>,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            temperature: None,
            timeout: None,
            extra_headers: BTreeMap::new(),
        }
    }
}

impl HttpBackendConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn insert_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(key.into(), value.into());
        self
    }
}
