use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

/// One atomic, trimmed, non-empty fragment of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step(String);

impl Step {
    /// Returns `None` for blank input.
    pub fn new(text: impl AsRef<str>) -> Option<Self> {
        let trimmed = text.as_ref().trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for Step {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Semantic label of a step. Exactly one per step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Navigate,
    Wait,
    Type,
    Click,
    Extract,
    General,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Navigate => "navigate",
            ActionType::Wait => "wait",
            ActionType::Type => "type",
            ActionType::Click => "click",
            ActionType::Extract => "extract",
            ActionType::General => "general",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time read of the page. Replaced, never mutated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    pub elements: PageElements,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageElements {
    pub buttons: Vec<ButtonInfo>,
    pub inputs: Vec<InputInfo>,
    pub links: Vec<LinkInfo>,
    pub text_elements: Vec<TextInfo>,
}

impl PageElements {
    /// Enforce the per-group caps that keep a prompt compact.
    pub fn cap(&mut self) {
        self.buttons.truncate(MAX_BUTTONS);
        self.inputs.truncate(MAX_INPUTS);
        self.links.truncate(MAX_LINKS);
        self.text_elements.truncate(MAX_TEXT_ELEMENTS);
    }

    pub fn is_empty(&self) -> bool {
        self.buttons.is_empty()
            && self.inputs.is_empty()
            && self.links.is_empty()
            && self.text_elements.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ButtonInfo {
    pub index: usize,
    pub text: String,
    pub id: Option<String>,
    pub class_name: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub position: String,
    pub size: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InputInfo {
    pub index: usize,
    #[serde(rename = "type")]
    pub kind: String,
    pub placeholder: String,
    pub name: Option<String>,
    pub id: Option<String>,
    pub label: String,
    pub value: String,
    pub required: bool,
    pub class_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkInfo {
    pub index: usize,
    pub text: String,
    pub href: String,
    pub id: Option<String>,
    pub class_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TextInfo {
    pub tag: String,
    pub text: String,
    pub id: Option<String>,
    pub class_name: Option<String>,
}

/// A message in the conversation sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

pub const MAX_BUTTONS: usize = 15;
pub const MAX_INPUTS: usize = 10;
pub const MAX_LINKS: usize = 10;
pub const MAX_TEXT_ELEMENTS: usize = 20;

pub const PROMPT_MAX_BUTTONS: usize = 10;
pub const PROMPT_MAX_INPUTS: usize = 10;
pub const PROMPT_MAX_LINKS: usize = 8;

pub const MAX_ATTEMPTS: u32 = 3;
pub const RETRY_BASE_DELAY_MS: u64 = 1000;
pub const STEP_SETTLE_MS: u64 = 1000;
pub const NAVIGATION_SETTLE_MS: u64 = 2000;
pub const FALLBACK_DELAY_MS: u64 = 1000;
pub const DEFAULT_WAIT_SECONDS: u64 = 5;
pub const POPUP_WAIT_MS: u64 = 2000;
/// How long a finished click keeps watching for a page it opened.
pub const POPUP_GRACE_MS: u64 = 500;
pub const ELEMENT_WAIT_TIMEOUT_MS: u64 = 10_000;

/// Text-entry controls; buttons and toggles rendered as `<input>` are excluded.
pub const TEXT_INPUTS: &str = "input:not([type=hidden]):not([type=submit]):not([type=button]):not([type=checkbox]):not([type=radio]), textarea";

/// Anything a user would plausibly click.
pub const CLICKABLES: &str = "button, [role=\"button\"], a";
