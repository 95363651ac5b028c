use std::sync::Arc;

use docscribe_core::{Config, LlmBackend};

/// Shared application state accessible from all handlers.
pub struct AppState {
    /// Resolved at startup from config file and environment.
    pub config: Config,
    /// Backend used when the upload form does not carry its own API key.
    /// `None` when no key is configured server-side.
    pub backend: Option<Arc<dyn LlmBackend>>,
    pub client: reqwest::Client,
}

impl AppState {
    pub fn new(config: Config, backend: Option<Arc<dyn LlmBackend>>) -> Self {
        Self {
            config,
            backend,
            client: docscribe_core::http_client(),
        }
    }
}
