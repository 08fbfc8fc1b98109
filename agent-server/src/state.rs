//! Shared application state for the agent server.

use std::sync::Arc;

use agent::io::config::AgentConfig;

/// State accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Loaded once at startup; every session starts from it.
    pub config: Arc<AgentConfig>,
}

impl AppState {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}
