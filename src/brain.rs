//! Language-model channel: prompt construction, the completion call and
//! cleanup of what comes back.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::ModelConfig;
use crate::error::{ModelError, SynthesisError};
use crate::types::{
    ActionType, ChatMessage, PROMPT_MAX_BUTTONS, PROMPT_MAX_INPUTS, PROMPT_MAX_LINKS,
    PageElements, PageSnapshot,
};

const OUTPUT_RULES: &str = r#"RULES:
1. Answer ONLY with statements, one per line. No markdown, no comments, no explanations.
2. Every statement starts with `await page.` and ends with `;`.
3. Prefer visible text, role and placeholder locators; fall back to CSS attributes.
4. To give alternatives for the same element chain them with `.or(...)`, most specific first.
5. Do not use try/catch, variables, loops or any JavaScript beyond the forms below.

ALLOWED FORMS:
- await page.goto('https://...');
- await page.waitForLoadState('networkidle');
- await page.waitForTimeout(1000);
- await page.waitForSelector('css');
- await page.keyboard.press('Enter');
- await page.title();
- await page.getByText('exact text').click();
- await page.getByRole('button', { name: 'text' }).click();
- await page.getByPlaceholder('placeholder').fill('value');
- await page.getByLabel('label').fill('value');
- await page.locator('[name="field"]').fill('value');
- await page.locator('button').filter({ hasText: 'text' }).click();
- await page.getByText('Send').or(page.getByRole('button', { name: 'Send' })).click();
- await page.locator('h1').textContent();"#;

/// A request/response channel to a chat-completion model.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ModelError>;
}

/// Client for any OpenAI-compatible `/chat/completions` endpoint
/// (OpenAI, OpenRouter, Ollama).
pub struct OpenAiClient {
    client: Client,
    config: ModelConfig,
}

impl OpenAiClient {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }
}

#[async_trait]
impl CompletionModel for OpenAiClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ModelError> {
        let response = self
            .client
            .post(self.config.completions_url())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .timeout(self.config.timeout)
            .json(&json!({
                "model": self.config.model,
                "messages": messages,
                "temperature": self.config.temperature,
                "max_tokens": self.config.max_tokens,
            }))
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        let body = response.text().await.map_err(request_error)?;

        if !status.is_success() {
            let message = api_error_message(&body);
            warn!(target: "brain", "API error ({}): {}", status, message);
            return Err(ModelError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let json_resp: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| ModelError::MalformedBody(e.to_string()))?;

        let content = json_resp["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ModelError::MalformedBody(json_resp.to_string()))?;

        debug!(target: "brain", "model says: {}", content);
        Ok(content.to_string())
    }
}

fn request_error(e: reqwest::Error) -> ModelError {
    if e.is_timeout() {
        ModelError::Timeout
    } else {
        ModelError::Transport(e.to_string())
    }
}

/// `error.message` from a JSON error body, else the start of the raw body.
fn api_error_message(body: &str) -> String {
    let from_json = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string));
    match from_json {
        Some(message) => message,
        None if body.trim().is_empty() => "Unknown API error".to_string(),
        None => body.trim().chars().take(200).collect(),
    }
}

/// System + user messages for one step.
pub fn build_messages(step: &str, snapshot: &PageSnapshot, action: ActionType) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(system_prompt(snapshot, action)),
        ChatMessage::user(format!("ACTION: {step}")),
    ]
}

pub fn system_prompt(snapshot: &PageSnapshot, action: ActionType) -> String {
    format!(
        "You are a web automation expert. Write browser automation statements for the step the user gives you.\n\n\
         CURRENT PAGE: {}\nTITLE: {}\n\n{}\nREQUIRED ACTION: {}\n\n{}\n\nWrite statements that work with the elements listed above.",
        snapshot.url,
        snapshot.title,
        format_elements(&snapshot.elements),
        action,
        OUTPUT_RULES
    )
}

/// Human-readable listing of the most relevant elements.
pub fn format_elements(elements: &PageElements) -> String {
    let mut out = String::from("AVAILABLE ELEMENTS:\n");

    if !elements.buttons.is_empty() {
        out.push_str("\nBUTTONS:\n");
        for button in elements.buttons.iter().take(PROMPT_MAX_BUTTONS) {
            let mut line = format!("- \"{}\" ({}", button.text, button.kind);
            if let Some(id) = button.id.as_deref().filter(|s| !s.is_empty()) {
                line.push_str(&format!(", id:{id}"));
            }
            if let Some(class) = button.class_name.as_deref().filter(|s| !s.is_empty()) {
                line.push_str(&format!(", class:{class}"));
            }
            out.push_str(&line);
            out.push_str(")\n");
        }
    }

    if !elements.inputs.is_empty() {
        out.push_str("\nINPUT FIELDS:\n");
        for input in elements.inputs.iter().take(PROMPT_MAX_INPUTS) {
            let mut line = format!("- {}", input.kind);
            if !input.placeholder.is_empty() {
                line.push_str(&format!(" placeholder:\"{}\"", input.placeholder));
            }
            if !input.label.is_empty() {
                line.push_str(&format!(" label:\"{}\"", input.label));
            }
            if let Some(name) = input.name.as_deref().filter(|s| !s.is_empty()) {
                line.push_str(&format!(" name:\"{name}\""));
            }
            out.push_str(&line);
            out.push('\n');
        }
    }

    if !elements.links.is_empty() {
        out.push_str("\nLINKS:\n");
        for link in elements.links.iter().take(PROMPT_MAX_LINKS) {
            out.push_str(&format!("- \"{}\"\n", link.text));
        }
    }

    out
}

/// Clean a raw completion: strip code fences, drop prose before the first
/// `await`, drop blank and `//` lines. Rejects output with no `await`.
pub fn extract_code(raw: &str) -> Result<String, SynthesisError> {
    let mut code = raw.trim().to_string();
    for fence in ["```javascript", "```typescript", "```js", "```ts", "```"] {
        code = code.replace(fence, "");
    }

    let Some(start) = code.find("await") else {
        return Err(SynthesisError::SynthesisInvalid(
            "generated code contains no asynchronous operations".to_string(),
        ));
    };

    Ok(code[start..]
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("//"))
        .collect::<Vec<_>>()
        .join("\n"))
}
