use std::fmt;
use std::time::Duration;

pub const DEFAULT_API_KEY: &str = "ollama";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434/v1";
pub const DEFAULT_MODEL: &str = "llama3:latest";
pub const DEFAULT_TEMPERATURE: f32 = 0.1;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_TOKENS: u32 = 300;

/// Settings for the OpenAI-compatible completion endpoint.
#[derive(Clone)]
pub struct ModelConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
    pub max_tokens: u32,
    pub debug: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: DEFAULT_API_KEY.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            timeout: DEFAULT_TIMEOUT,
            max_tokens: DEFAULT_MAX_TOKENS,
            debug: false,
        }
    }
}

impl ModelConfig {
    /// Read `OPENAI_API_KEY`, `OPENAI_BASE_URL`, `AI_MODEL` and `DEBUG_MODE`,
    /// keeping defaults for anything unset. Callers load `.env` beforehand.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            api_key: non_empty("OPENAI_API_KEY").unwrap_or(defaults.api_key),
            base_url: non_empty("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            model: non_empty("AI_MODEL").unwrap_or(defaults.model),
            debug: lookup("DEBUG_MODE").is_some_and(|v| v == "true"),
            ..defaults
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// `{base_url}/chat/completions`, tolerating a trailing slash.
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

// The API key stays out of logs.
impl fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("api_key", &"***")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("timeout", &self.timeout)
            .field("max_tokens", &self.max_tokens)
            .field("debug", &self.debug)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_when_env_is_empty() {
        let config = ModelConfig::from_lookup(|_| None);
        assert_eq!(config.api_key, "ollama");
        assert_eq!(config.model, "llama3:latest");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.max_tokens, 300);
        assert!(!config.debug);
    }

    #[test]
    fn test_env_overrides() {
        let env = HashMap::from([
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_BASE_URL", "https://openrouter.ai/api/v1/"),
            ("AI_MODEL", "deepseek/deepseek-chat"),
            ("DEBUG_MODE", "true"),
        ]);
        let config = ModelConfig::from_lookup(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.api_key, "sk-test");
        assert_eq!(config.model, "deepseek/deepseek-chat");
        assert!(config.debug);
        assert_eq!(
            config.completions_url(),
            "https://openrouter.ai/api/v1/chat/completions"
        );
    }

    #[test]
    fn test_debug_output_hides_key() {
        let config = ModelConfig::default().with_api_key("sk-secret");
        assert!(!format!("{config:?}").contains("sk-secret"));
    }
}
