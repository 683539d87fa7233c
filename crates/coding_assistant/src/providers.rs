use std::sync::Arc;

use generation_backend::GenerationBackend;
use generation_backend_http::{HttpBackend, HttpBackendConfig, HTTP_BACKEND_ID};
use generation_backend_mock::{MockBackend, MOCK_BACKEND_ID};
use mlx_code::EnvConfig;

pub const DEFAULT_BACKEND_ID: &str = MOCK_BACKEND_ID;
pub const API_KEY_ENV_VAR: &str = "MLX_CODE_API_KEY";

pub fn backend_from_env(env: &EnvConfig) -> Result<Arc<dyn GenerationBackend>, String> {
    let api_key = std::env::var(API_KEY_ENV_VAR)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());
    let backend_id = env
        .backend
        .as_deref()
        .map(str::trim)
        .unwrap_or(DEFAULT_BACKEND_ID);
    backend_for_id(backend_id, env, api_key.as_deref())
}

pub fn backend_for_id(
    backend_id: &str,
    env: &EnvConfig,
    api_key: Option<&str>,
) -> Result<Arc<dyn GenerationBackend>, String> {
    match backend_id {
        MOCK_BACKEND_ID => Ok(Arc::new(MockBackend::default())),
        HTTP_BACKEND_ID => {
            let mut config = match &env.model {
                Some(model) => HttpBackendConfig::new(model.trim()),
                None => HttpBackendConfig::default(),
            };
            if let Some(base_url) = &env.base_url {
                config = config.with_base_url(base_url.trim());
            }
            if let Some(api_key) = api_key {
                config = config.with_api_key(api_key);
            }
            let backend = HttpBackend::new(config).map_err(|error| error.message().to_string())?;
            Ok(Arc::new(backend))
        }
        unknown => Err(format!(
            "Unsupported backend '{unknown}'. Available backends: {MOCK_BACKEND_ID}, {HTTP_BACKEND_ID}"
        )),
    }
}
