//! Interpreter for generated programs.
//!
//! Each instruction maps onto one or two `Page` calls. A failing program is
//! retried with a linear backoff; the alternative strategy is a last resort
//! the runner reaches for once retries are spent.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{ExecutionError, PageError};
use crate::hands::{Page, PageHandle};
use crate::script::{Instruction, Target};
use crate::session::SessionTracker;
use crate::synth::GeneratedCode;
use crate::types::{CLICKABLES, ELEMENT_WAIT_TIMEOUT_MS, MAX_ATTEMPTS, RETRY_BASE_DELAY_MS};

const ALTERNATIVE_INPUTS: &str = "input, textarea";

/// What to do with the first target that resolves.
#[derive(Clone, Copy)]
enum TargetAction<'a> {
    Click,
    Fill(&'a str),
    WaitFor(Duration),
    Text,
}

pub struct ExecutionEngine {
    max_attempts: u32,
    retry_base_delay: Duration,
    element_timeout: Duration,
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            retry_base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
            element_timeout: Duration::from_millis(ELEMENT_WAIT_TIMEOUT_MS),
        }
    }
}

impl ExecutionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// `attempts` is clamped to at least one. Attempt `n` is followed by a
    /// pause of `n * base_delay` when another attempt remains.
    pub fn with_retries(mut self, attempts: u32, base_delay: Duration) -> Self {
        self.max_attempts = attempts.max(1);
        self.retry_base_delay = base_delay;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `code` against `page`, retrying on failure. `page` is updated in
    /// place whenever a click moves the session to another page.
    pub async fn execute(
        &self,
        code: &GeneratedCode,
        page: &mut PageHandle,
        session: &mut SessionTracker,
    ) -> Result<Option<String>, ExecutionError> {
        debug!(target: "engine", "Executing {:?} program:\n{}", code.origin, code);

        let mut attempt = 1;
        loop {
            let err = match self.run_guarded(code, page, session).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            warn!(
                target: "engine",
                "Attempt {}/{} failed: {}", attempt, self.max_attempts, err
            );

            if attempt >= self.max_attempts {
                return Err(ExecutionError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }
            tokio::time::sleep(self.retry_base_delay * attempt).await;
            attempt += 1;
        }
    }

    async fn run_guarded(
        &self,
        code: &GeneratedCode,
        page: &mut PageHandle,
        session: &mut SessionTracker,
    ) -> Result<Option<String>, ExecutionError> {
        AssertUnwindSafe(self.run_program(code, page, session))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ExecutionError::Panicked(panic_message(panic))))
    }

    async fn run_program(
        &self,
        code: &GeneratedCode,
        page: &mut PageHandle,
        session: &mut SessionTracker,
    ) -> Result<Option<String>, ExecutionError> {
        *page = session.resolve_active_page(page)?;

        let mut value = None;
        for instruction in &code.program {
            if let Some(read) = self.run_instruction(instruction, page, session).await? {
                value = Some(read);
            }
        }
        Ok(value)
    }

    async fn run_instruction(
        &self,
        instruction: &Instruction,
        page: &mut PageHandle,
        session: &mut SessionTracker,
    ) -> Result<Option<String>, ExecutionError> {
        let current = page.clone();
        match instruction {
            Instruction::Navigate(url) => {
                info!(target: "engine", "Navigating to {}", url);
                current.goto(url).await?;
            }
            Instruction::WaitForLoad(state) => current.wait_for_load_state(*state).await?,
            Instruction::Wait(ms) => current.wait_for_timeout(*ms).await,
            Instruction::WaitForSelector(selector) => {
                current
                    .wait_for_selector(selector, self.element_timeout)
                    .await?
            }
            Instruction::WaitFor(targets) => {
                on_first_match(&*current, targets, TargetAction::WaitFor(self.element_timeout))
                    .await?;
            }
            Instruction::Click(targets) => self.click(targets, page, session).await?,
            Instruction::Fill(targets, text) => {
                on_first_match(&*current, targets, TargetAction::Fill(text.as_str())).await?;
            }
            Instruction::Press { targets, key } => {
                if !targets.is_empty() {
                    on_first_match(&*current, targets, TargetAction::Click).await?;
                }
                current.press(key).await?;
            }
            Instruction::Extract(targets) => {
                return Ok(on_first_match(&*current, targets, TargetAction::Text).await?);
            }
            Instruction::ReadTitle => return Ok(Some(current.title().await?)),
        }
        Ok(None)
    }

    async fn click(
        &self,
        targets: &[Target],
        page: &mut PageHandle,
        session: &mut SessionTracker,
    ) -> Result<(), ExecutionError> {
        let current = page.clone();
        let target_page: &dyn Page = &*current;
        let next = session
            .click_possibly_opening_new_page(&current, move || async move {
                on_first_match(target_page, targets, TargetAction::Click)
                    .await
                    .map(|_| ())
            })
            .await?;
        *page = next;
        Ok(())
    }

    /// Generic action keyed on words in the step, used once every attempt
    /// has failed. Clicks go through the session like any other click. A step
    /// with no matching word is left alone and the command carries on.
    pub async fn alternative_strategy(
        &self,
        step: &str,
        page: &mut PageHandle,
        session: &mut SessionTracker,
    ) -> Result<(), ExecutionError> {
        let lower = step.to_lowercase();
        let outcome = if lower.contains("clic") || lower.contains("pulsa") {
            warn!(target: "engine", "Alternative strategy: clicking the first clickable element");
            self.alternative_click(page, session).await
        } else if lower.contains("escribe") {
            warn!(target: "engine", "Alternative strategy: clearing the first input");
            self.alternative_fill(page, session).await
        } else {
            warn!(target: "engine", "Alternative strategy: nothing generic to do for \"{}\"", step);
            return Ok(());
        };
        outcome.map_err(|e| ExecutionError::AlternativeStrategyFailed(e.to_string()))
    }

    async fn alternative_click(
        &self,
        page: &mut PageHandle,
        session: &mut SessionTracker,
    ) -> Result<(), ExecutionError> {
        *page = session.resolve_active_page(page)?;
        self.click(&[Target::css(CLICKABLES)], page, session).await
    }

    async fn alternative_fill(
        &self,
        page: &mut PageHandle,
        session: &mut SessionTracker,
    ) -> Result<(), ExecutionError> {
        *page = session.resolve_active_page(page)?;
        page.fill(&Target::css(ALTERNATIVE_INPUTS), "").await?;
        Ok(())
    }
}

/// Apply `action` to the first target that works, in order.
async fn on_first_match(
    page: &dyn Page,
    targets: &[Target],
    action: TargetAction<'_>,
) -> Result<Option<String>, PageError> {
    let mut last = None;
    for target in targets {
        let outcome = match action {
            TargetAction::Click => page.click(target).await.map(|_| None),
            TargetAction::Fill(text) => page.fill(target, text).await.map(|_| None),
            TargetAction::WaitFor(timeout) => page.wait_for(target, timeout).await.map(|_| None),
            TargetAction::Text => page.text_content(target).await.map(Some),
        };
        match outcome {
            Ok(value) => return Ok(value),
            Err(e) => {
                debug!(target: "engine", "{} did not work: {}", target, e);
                last = Some(e);
            }
        }
    }
    Err(last.unwrap_or_else(|| PageError::NotFound("an empty target list".to_string())))
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
