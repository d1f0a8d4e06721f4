//! Tracking which page later steps should act on.
//!
//! The tracker holds the most recently observed browsing context. It is the
//! only state that outlives a command, and every write replaces the previous
//! value. A shared tracker also publishes its writes to a process-wide slot,
//! which is how [`crate::auto`] carries the context from one call to the next.

use futures::future::{self, Either};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{ExecutionError, PageError, SessionError};
use crate::hands::{BrowserContext, PageHandle};
use crate::script::LoadState;
use crate::types::{POPUP_GRACE_MS, POPUP_WAIT_MS};

static LAST_CONTEXT: Mutex<Option<Arc<dyn BrowserContext>>> = Mutex::new(None);

fn last_context() -> MutexGuard<'static, Option<Arc<dyn BrowserContext>>> {
    LAST_CONTEXT.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct SessionTracker {
    active_context: Option<Arc<dyn BrowserContext>>,
    popup_wait: Option<Duration>,
    shared: bool,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A tracker seeded from the process-wide slot. Every context it observes
    /// is written back there; the last write wins.
    pub fn shared() -> Self {
        Self {
            active_context: last_context().clone(),
            shared: true,
            ..Self::default()
        }
    }

    /// Override how long a click waits for a new page to appear.
    pub fn with_popup_wait(mut self, wait: Duration) -> Self {
        self.popup_wait = Some(wait);
        self
    }

    pub fn active_context(&self) -> Option<&Arc<dyn BrowserContext>> {
        self.active_context.as_ref()
    }

    /// Record `context` as the most recent one, replacing any earlier value.
    pub fn observe_context(&mut self, context: Arc<dyn BrowserContext>) {
        if self.shared {
            *last_context() = Some(context.clone());
        }
        self.active_context = Some(context);
    }

    /// `page` itself while it is open; otherwise the newest page of its
    /// context, or of the last observed context.
    pub fn resolve_active_page(&self, page: &PageHandle) -> Result<PageHandle, SessionError> {
        if !page.is_closed() {
            return Ok(page.clone());
        }

        let context = page
            .context()
            .or_else(|| self.active_context.clone())
            .ok_or(SessionError::NoActiveContext)?;
        let recovered = context
            .pages()
            .pop()
            .ok_or(SessionError::NoActivePages)?;
        info!(target: "session", "Page closed, continuing on {}", recovered.url());
        Ok(recovered)
    }

    /// Run `click` while watching for a page it may open. Once the click is
    /// done the watch continues for a short grace period at most. Returns the
    /// popup once it has loaded its DOM, or the resolved active page otherwise.
    pub async fn click_possibly_opening_new_page<F, Fut>(
        &mut self,
        page: &PageHandle,
        click: F,
    ) -> Result<PageHandle, ExecutionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), PageError>>,
    {
        let Some(context) = page.context() else {
            click().await?;
            return Ok(self.resolve_active_page(page)?);
        };
        self.observe_context(context.clone());

        let wait = self
            .popup_wait
            .unwrap_or(Duration::from_millis(POPUP_WAIT_MS));
        let grace = wait.min(Duration::from_millis(POPUP_GRACE_MS));
        let watcher = context.wait_for_page(wait);
        let (popup, clicked) = match future::select(watcher, Box::pin(click())).await {
            Either::Left((popup, click)) => (popup, click.await),
            Either::Right((clicked, watcher)) => {
                let popup = tokio::time::timeout(grace, watcher).await.ok().flatten();
                (popup, clicked)
            }
        };
        clicked?;

        match popup {
            Some(new_page) => {
                if let Err(e) = new_page
                    .wait_for_load_state(LoadState::DomContentLoaded)
                    .await
                {
                    debug!(target: "session", "New page did not report its DOM: {}", e);
                }
                info!(target: "session", "Click opened a new page: {}", new_page.url());
                Ok(new_page)
            }
            None => Ok(self.resolve_active_page(page)?),
        }
    }
}
