//! Turning a classified step into a program.
//!
//! Navigation and waits use fixed templates. Everything else asks the model
//! and, when the model is unreachable or answers with something unusable,
//! falls back to a keyword heuristic. Only `NoUrlFound` ever escapes.

use regex::Regex;
use std::fmt;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

use crate::brain::{self, CompletionModel};
use crate::error::SynthesisError;
use crate::script::{self, Instruction, LoadState, Target};
use crate::types::{
    ActionType, DEFAULT_WAIT_SECONDS, FALLBACK_DELAY_MS, NAVIGATION_SETTLE_MS, PageSnapshot,
    TEXT_INPUTS,
};

static ABSOLUTE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://\S+").expect("valid regex"));
static BARE_DOMAIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").expect("valid regex"));
static SECONDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*segundos?").expect("valid regex"));
static QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["'](.*?)["']"#).expect("valid regex"));
static AFTER_KEYWORD: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"(?i)(?:escribe|ingresa|llena)\s+(.+)").expect("valid regex"),
        Regex::new(r"(?i)(?:clic|pulsa|presiona).*?(?:en|el|la)\s+(.+)").expect("valid regex"),
        Regex::new(r"(?i)(?:busca|encuentra)\s+(.+)").expect("valid regex"),
    ]
});
static ELEMENT_NOUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:el\s+|la\s+)?(?:botón|boton|enlace|link|vínculo|pestaña)\s+(?:que\s+dice\s+)?")
        .expect("valid regex")
});

/// Where a program came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeOrigin {
    Template,
    Model,
    Heuristic,
}

/// A non-empty program ready for the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedCode {
    pub origin: CodeOrigin,
    pub program: Vec<Instruction>,
}

impl GeneratedCode {
    fn new(origin: CodeOrigin, program: Vec<Instruction>) -> Self {
        Self { origin, program }
    }
}

impl fmt::Display for GeneratedCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, instruction) in self.program.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{instruction}")?;
        }
        Ok(())
    }
}

pub struct Synthesizer {
    model: Arc<dyn CompletionModel>,
}

impl Synthesizer {
    pub fn new(model: Arc<dyn CompletionModel>) -> Self {
        Self { model }
    }

    pub async fn synthesize(
        &self,
        step: &str,
        snapshot: &PageSnapshot,
        action: ActionType,
    ) -> Result<GeneratedCode, SynthesisError> {
        match action {
            ActionType::Navigate => navigation_code(step),
            ActionType::Wait => Ok(wait_code(step)),
            _ => Ok(self.model_code(step, snapshot, action).await),
        }
    }

    async fn model_code(
        &self,
        step: &str,
        snapshot: &PageSnapshot,
        action: ActionType,
    ) -> GeneratedCode {
        match self.ask_model(step, snapshot, action).await {
            Ok(program) => GeneratedCode::new(CodeOrigin::Model, program),
            Err(e) => {
                warn!(target: "synth", "Falling back to heuristic code: {}", e);
                fallback_code(step, action)
            }
        }
    }

    async fn ask_model(
        &self,
        step: &str,
        snapshot: &PageSnapshot,
        action: ActionType,
    ) -> Result<Vec<Instruction>, SynthesisError> {
        let messages = brain::build_messages(step, snapshot, action);
        let raw = self.model.complete(&messages).await?;
        let code = brain::extract_code(&raw)?;
        debug!(target: "synth", "Cleaned model code:\n{}", code);
        script::parse_program(&code).map_err(|e| SynthesisError::SynthesisInvalid(e.to_string()))
    }
}

/// First URL-like token, with `https://` added when no scheme is present.
pub fn extract_url(step: &str) -> Option<String> {
    let found = ABSOLUTE_URL
        .find(step)
        .or_else(|| BARE_DOMAIN.find(step))?
        .as_str();
    if found.starts_with("http") {
        Some(found.to_string())
    } else {
        Some(format!("https://{found}"))
    }
}

pub fn navigation_code(step: &str) -> Result<GeneratedCode, SynthesisError> {
    let url = extract_url(step).ok_or(SynthesisError::NoUrlFound)?;
    Ok(GeneratedCode::new(
        CodeOrigin::Template,
        vec![
            Instruction::Navigate(url),
            Instruction::WaitForLoad(LoadState::NetworkIdle),
            Instruction::Wait(NAVIGATION_SETTLE_MS),
        ],
    ))
}

pub fn wait_code(step: &str) -> GeneratedCode {
    let seconds = SECONDS
        .captures(step)
        .and_then(|c| c[1].parse::<u64>().ok())
        .unwrap_or(DEFAULT_WAIT_SECONDS);
    GeneratedCode::new(
        CodeOrigin::Template,
        vec![Instruction::Wait(seconds.saturating_mul(1000))],
    )
}

/// Quoted text, else whatever follows an action keyword.
pub fn extract_text_fragment(step: &str) -> Option<String> {
    if let Some(captures) = QUOTED.captures(step) {
        return Some(captures[1].to_string());
    }
    AFTER_KEYWORD
        .iter()
        .find_map(|pattern| pattern.captures(step))
        .map(|captures| captures[1].trim().to_string())
}

/// Keyword heuristic used when the model cannot help. Never fails.
pub fn fallback_code(step: &str, action: ActionType) -> GeneratedCode {
    let fragment = extract_text_fragment(step);
    let program = match (action, fragment) {
        (ActionType::Click, Some(text)) => {
            let text = ELEMENT_NOUN.replace(&text, "").trim().to_string();
            vec![Instruction::Click(vec![
                Target::Text(text.clone()),
                Target::css_with_text("button", text.clone()),
                Target::css_with_text("[role=\"button\"]", text),
            ])]
        }
        (ActionType::Type, Some(text)) => {
            vec![Instruction::Fill(vec![Target::css(TEXT_INPUTS)], text)]
        }
        _ => vec![Instruction::Wait(FALLBACK_DELAY_MS)],
    };
    GeneratedCode::new(CodeOrigin::Heuristic, program)
}
