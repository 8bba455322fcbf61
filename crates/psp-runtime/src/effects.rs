//! Observable side effects of the coordinator
//!
//! The coordinator never touches a UI or a page directly. It calls these
//! hooks after the corresponding state has been persisted.

use async_trait::async_trait;
use psp_core::{DetectionResult, Generation, TabId};

/// Shows the current result for the active tab. `None` means neutral.
#[async_trait]
pub trait Presenter: Send + Sync {
    async fn present(&self, tab_id: TabId, result: Option<&DetectionResult>);
}

/// Asks a tab's page agent to run detection.
#[async_trait]
pub trait ScanDispatcher: Send + Sync {
    async fn request_scan(&self, tab_id: TabId, generation: Generation, url: &str);
}

/// Effects that only log. Used when no UI is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEffects;

#[async_trait]
impl Presenter for LogEffects {
    async fn present(&self, tab_id: TabId, result: Option<&DetectionResult>) {
        match result {
            Some(DetectionResult::Detected { provider, .. }) => {
                log::info!("tab {}: showing provider {}", tab_id, provider)
            }
            Some(other) => log::info!("tab {}: showing {}", tab_id, other.kind()),
            None => log::info!("tab {}: showing neutral", tab_id),
        }
    }
}

#[async_trait]
impl ScanDispatcher for LogEffects {
    async fn request_scan(&self, tab_id: TabId, generation: Generation, url: &str) {
        log::info!("tab {}: scan requested for {} (generation {})", tab_id, url, generation);
    }
}
