pub mod gemini;
pub mod openai;

use std::fmt;
use std::time::Duration;

#[derive(Debug)]
pub enum LlmError {
    ConnectionError(String),
    Timeout(Duration),
    AuthError(String),
    RequestError(String),
    ParseError(String),
    ModelNotFound(String),
    EmptyResponse,
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::ConnectionError(msg) => write!(f, "Connection error: {}", msg),
            LlmError::Timeout(after) => {
                write!(f, "Request timed out after {} seconds", after.as_secs())
            }
            LlmError::AuthError(msg) => write!(f, "Authentication failed: {}", msg),
            LlmError::RequestError(msg) => write!(f, "Request error: {}", msg),
            LlmError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            LlmError::ModelNotFound(model) => write!(f, "Model not found: {}", model),
            LlmError::EmptyResponse => write!(f, "Provider returned no text"),
        }
    }
}

impl std::error::Error for LlmError {}

/// A text-generation backend. One implementation per provider.
pub trait LlmProvider {
    fn name(&self) -> &str;
    fn generate(&self, prompt: &str) -> Result<String, LlmError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Google,
    OpenAi,
}

impl ProviderKind {
    /// Accepts the common nicknames for each provider.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "google" | "gemini" | "g" | "gg" => Some(ProviderKind::Google),
            "openai" | "chatgpt" | "oai" | "gpt" => Some(ProviderKind::OpenAi),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Google => "google",
            ProviderKind::OpenAi => "openai",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::Google => "https://generativelanguage.googleapis.com",
            ProviderKind::OpenAi => "https://api.openai.com",
        }
    }

    /// Environment variables checked, in order, when the config has no key.
    pub fn api_key_env_vars(&self) -> &'static [&'static str] {
        match self {
            ProviderKind::Google => &["GOOGLE_API_KEY", "GEMINI_API_KEY"],
            ProviderKind::OpenAi => &["OPENAI_API_KEY"],
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to build a provider client.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub model: String,
    pub api_key: String,
    pub base_url: Option<String>,
    pub timeout: Duration,
}

pub fn create_provider(settings: &ProviderSettings) -> Result<Box<dyn LlmProvider>, LlmError> {
    let base_url = settings
        .base_url
        .as_deref()
        .unwrap_or_else(|| settings.kind.default_base_url());
    let provider: Box<dyn LlmProvider> = match settings.kind {
        ProviderKind::Google => Box::new(gemini::GeminiClient::new(
            base_url,
            &settings.model,
            settings.api_key.clone(),
            settings.timeout,
        )?),
        ProviderKind::OpenAi => Box::new(openai::OpenAiClient::new(
            base_url,
            &settings.model,
            settings.api_key.clone(),
            settings.timeout,
        )?),
    };
    Ok(provider)
}

pub(crate) fn build_http_client(timeout: Duration) -> Result<reqwest::blocking::Client, LlmError> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| LlmError::RequestError(format!("Failed to create HTTP client: {}", e)))
}

/// Map a transport failure onto the error kinds shown to the user.
pub(crate) fn map_send_error(e: reqwest::Error, base_url: &str, timeout: Duration) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout(timeout)
    } else if e.is_connect() {
        LlmError::ConnectionError(format!("Cannot connect to {}", base_url))
    } else {
        LlmError::RequestError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_aliases() {
        for name in ["google", "Gemini", "g", "GG", " gemini "] {
            assert_eq!(ProviderKind::parse(name), Some(ProviderKind::Google), "{}", name);
        }
        for name in ["openai", "ChatGPT", "oai", "gpt"] {
            assert_eq!(ProviderKind::parse(name), Some(ProviderKind::OpenAi), "{}", name);
        }
        assert_eq!(ProviderKind::parse("anthropic"), None);
        assert_eq!(ProviderKind::parse(""), None);
    }

    #[test]
    fn test_provider_kind_env_vars() {
        assert_eq!(
            ProviderKind::Google.api_key_env_vars(),
            &["GOOGLE_API_KEY", "GEMINI_API_KEY"]
        );
        assert_eq!(ProviderKind::OpenAi.api_key_env_vars(), &["OPENAI_API_KEY"]);
    }

    #[test]
    fn test_create_provider_uses_kind() {
        let settings = ProviderSettings {
            kind: ProviderKind::OpenAi,
            model: "gpt-4o-mini".to_string(),
            api_key: "sk-test".to_string(),
            base_url: None,
            timeout: Duration::from_secs(5),
        };
        let provider = create_provider(&settings).unwrap();
        assert_eq!(provider.name(), "openai");

        let settings = ProviderSettings {
            kind: ProviderKind::Google,
            ..settings
        };
        let provider = create_provider(&settings).unwrap();
        assert_eq!(provider.name(), "google");
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            LlmError::Timeout(Duration::from_secs(30)).to_string(),
            "Request timed out after 30 seconds"
        );
        assert_eq!(LlmError::EmptyResponse.to_string(), "Provider returned no text");
    }
}
