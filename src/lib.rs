//! Drive a browser page with plain Spanish commands.
//!
//! ```no_run
//! # async fn demo(page: natural_browser::PageHandle) -> Result<(), natural_browser::AutoError> {
//! use natural_browser::{auto, AutoContext};
//!
//! let title = auto(
//!     "abre example.com y obtén el título de la página",
//!     AutoContext { page, test: Some("smoke") },
//!     None,
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod brain;
pub mod classify;
pub mod config;
pub mod dom;
pub mod engine;
pub mod error;
pub mod hands;
pub mod script;
pub mod segment;
pub mod session;
pub mod synth;
pub mod types;

use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, debug, error, info, info_span, warn};

pub use brain::{CompletionModel, OpenAiClient};
pub use config::ModelConfig;
pub use engine::ExecutionEngine;
pub use error::{AutoError, ExecutionError, StepError, SynthesisError};
pub use hands::{BrowserContext, Page, PageHandle};
pub use session::SessionTracker;
pub use synth::{GeneratedCode, Synthesizer};
pub use types::{ActionType, PageSnapshot, Step};

use types::STEP_SETTLE_MS;

/// The page a command starts on, plus the name of the test driving it.
pub struct AutoContext<'a> {
    pub page: PageHandle,
    pub test: Option<&'a str>,
}

/// Run `command` against `ctx.page`.
///
/// Without a `config` the model settings come from the environment. The last
/// browsing context a click touched is remembered for the whole process, so a
/// later call can recover from a page that has since closed. Returns the last
/// non-empty value read by any step.
pub async fn auto(
    command: &str,
    ctx: AutoContext<'_>,
    config: Option<ModelConfig>,
) -> Result<Option<String>, AutoError> {
    let config = config.unwrap_or_else(ModelConfig::from_env);
    NaturalBrowser::new(config)
        .with_session(SessionTracker::shared())
        .run(command, ctx)
        .await
}

/// Runner that keeps its session (the last browsing context a click touched)
/// across commands.
pub struct NaturalBrowser {
    synthesizer: Synthesizer,
    engine: ExecutionEngine,
    session: SessionTracker,
    settle: Duration,
    last_page: Option<PageHandle>,
}

impl NaturalBrowser {
    pub fn new(config: ModelConfig) -> Self {
        Self::with_model(Arc::new(OpenAiClient::new(config)))
    }

    pub fn with_model(model: Arc<dyn CompletionModel>) -> Self {
        Self {
            synthesizer: Synthesizer::new(model),
            engine: ExecutionEngine::default(),
            session: SessionTracker::default(),
            settle: Duration::from_millis(STEP_SETTLE_MS),
            last_page: None,
        }
    }

    pub fn with_engine(mut self, engine: ExecutionEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_session(mut self, session: SessionTracker) -> Self {
        self.session = session;
        self
    }

    /// Pause inserted before every step but the first.
    pub fn with_settle_delay(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn session(&self) -> &SessionTracker {
        &self.session
    }

    /// The page the last command finished on.
    pub fn last_page(&self) -> Option<&PageHandle> {
        self.last_page.as_ref()
    }

    pub async fn run(
        &mut self,
        command: &str,
        ctx: AutoContext<'_>,
    ) -> Result<Option<String>, AutoError> {
        let span = info_span!("auto", test = ctx.test.unwrap_or("-"));
        self.run_steps(command, ctx.page).instrument(span).await
    }

    async fn run_steps(
        &mut self,
        command: &str,
        mut page: PageHandle,
    ) -> Result<Option<String>, AutoError> {
        let steps = segment::segment(command);
        if steps.is_empty() {
            return Err(AutoError::SegmentationEmpty);
        }
        info!(target: "auto", "Running {} step(s): {}", steps.len(), command);

        let mut result = None;
        for (i, step) in steps.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.settle).await;
            }
            info!(target: "auto", "Step {}/{}: {}", i + 1, steps.len(), step);

            match self.run_step(step, &mut page).await {
                Ok(Some(value)) if !value.is_empty() => result = Some(value),
                Ok(_) => {}
                Err(err) => {
                    warn!(target: "auto", "Step failed, trying alternative strategy: {}", err);
                    if let Err(alt) = self
                        .engine
                        .alternative_strategy(step, &mut page, &mut self.session)
                        .await
                    {
                        error!(target: "auto", "Step \"{}\" failed: {} ({})", step, err, alt);
                        self.last_page = Some(page);
                        return Err(AutoError::StepFailed {
                            step: step.to_string(),
                            message: err.to_string(),
                        });
                    }
                    info!(target: "auto", "Alternative strategy succeeded");
                }
            }
        }

        self.last_page = Some(page);
        Ok(result)
    }

    async fn run_step(
        &mut self,
        step: &Step,
        page: &mut PageHandle,
    ) -> Result<Option<String>, StepError> {
        *page = self.session.resolve_active_page(page)?;
        let snapshot = dom::extract(page.as_ref()).await;
        let action = classify::classify(step);
        debug!(target: "auto", "Classified as {}", action);

        let code = self.synthesizer.synthesize(step, &snapshot, action).await?;
        Ok(self.engine.execute(&code, page, &mut self.session).await?)
    }
}
