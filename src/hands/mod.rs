//! The browser capability the engine drives. Implementations do the actual
//! clicking and typing; the engine never reaches past these traits.

pub mod chrome;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::PageError;
use crate::script::{LoadState, Target};

pub type PageHandle = Arc<dyn Page>;

/// A single browser page (tab).
#[async_trait]
pub trait Page: Send + Sync {
    fn url(&self) -> String;

    async fn title(&self) -> Result<String, PageError>;

    fn is_closed(&self) -> bool;

    /// The browsing context owning this page, if it is still reachable.
    fn context(&self) -> Option<Arc<dyn BrowserContext>>;

    /// Evaluate a script in the page and return its value.
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, PageError>;

    async fn goto(&self, url: &str) -> Result<(), PageError>;

    async fn wait_for_load_state(&self, state: LoadState) -> Result<(), PageError>;

    async fn wait_for_timeout(&self, ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<(), PageError>;

    /// Wait until `target` resolves to a visible element.
    async fn wait_for(&self, target: &Target, timeout: Duration) -> Result<(), PageError>;

    async fn click(&self, target: &Target) -> Result<(), PageError>;

    /// Replace the element's value with `text`.
    async fn fill(&self, target: &Target, text: &str) -> Result<(), PageError>;

    /// Press a key on whatever currently has focus.
    async fn press(&self, key: &str) -> Result<(), PageError>;

    async fn text_content(&self, target: &Target) -> Result<String, PageError>;
}

/// A set of pages sharing a browser session.
#[async_trait]
pub trait BrowserContext: Send + Sync {
    /// Open pages, oldest first.
    fn pages(&self) -> Vec<PageHandle>;

    /// Resolve with the first page opened after the call, or `None` once
    /// `timeout` elapses.
    async fn wait_for_page(&self, timeout: Duration) -> Option<PageHandle>;
}
