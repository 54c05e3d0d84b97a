//! Shared handler state.

use survey_proxy_common::{AppResult, Config};
use survey_proxy_core::Orchestrator;

/// Application state shared by every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Runs extraction requests upstream.
    pub orchestrator: Orchestrator,
}

impl AppState {
    /// Wrap an orchestrator.
    #[must_use]
    pub const fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }

    /// Build the state from configuration.
    pub fn from_config(config: &Config) -> AppResult<Self> {
        Ok(Self::new(Orchestrator::from_config(config)?))
    }
}
