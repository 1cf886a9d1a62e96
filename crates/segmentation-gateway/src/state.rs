use std::sync::Arc;

use segmentation_common::Result;
use segmentation_config::AppConfig;
use segmentation_db::{SegmentEngine, SegmentStore};

/// Shared application state accessible from all request handlers.
/// Read-only after startup; the only shared resource is the store pool
/// inside the engine.
pub struct AppState {
    pub config: AppConfig,
    pub engine: SegmentEngine,
}

impl AppState {
    pub fn new(config: AppConfig, engine: SegmentEngine) -> Self {
        Self { config, engine }
    }

    /// Open the configured store and wire the engine to it.
    pub fn open(config: AppConfig) -> Result<Self> {
        let store = SegmentStore::open(&config.database)?;
        let engine = SegmentEngine::new(store, &config);
        Ok(Self::new(config, engine))
    }

    /// Public link under which a generated report can be downloaded.
    pub fn download_link(&self, file_name: &str) -> String {
        let prefix = self
            .config
            .http
            .report_host
            .as_deref()
            .unwrap_or("/user/report/");
        format!("{prefix}{file_name}")
    }
}

pub type SharedState = Arc<AppState>;
