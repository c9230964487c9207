use super::{build_http_client, map_send_error, LlmError, LlmProvider};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub struct GeminiClient {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    timeout: Duration,
    client: reqwest::blocking::Client,
}

// --- Gemini API request/response types ---

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize, Debug)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

// --- Implementation ---

impl GeminiClient {
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: String,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            timeout,
            client: build_http_client(timeout)?,
        })
    }

    fn build_request(prompt: &str) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts: vec![GeminiPart {
                    text: Some(prompt.to_string()),
                }],
            }],
            generation_config: GenerationConfig { temperature: 0.0 },
        }
    }

    fn parse_response(resp: GenerateContentResponse) -> Result<String, LlmError> {
        let candidate = resp
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::ParseError("No candidates in response".to_string()))?;

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(text)
    }
}

impl LlmProvider for GeminiClient {
    fn name(&self) -> &str {
        "google"
    }

    fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        tracing::debug!(model = %self.model, "sending Gemini generateContent request");

        let response = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::build_request(prompt))
            .send()
            .map_err(|e| map_send_error(e, &self.base_url, self.timeout))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(LlmError::ModelNotFound(format!(
                "Model '{}' not found on Gemini API",
                self.model
            )));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(LlmError::AuthError(
                "Gemini rejected the API key".to_string(),
            ));
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            // Gemini reports a bad key as 400 INVALID_ARGUMENT.
            if body.contains("API_KEY_INVALID") {
                return Err(LlmError::AuthError(
                    "Gemini rejected the API key".to_string(),
                ));
            }
            return Err(LlmError::RequestError(format!(
                "Gemini API returned status {}: {}",
                status, body
            )));
        }

        let resp_body: GenerateContentResponse = response
            .json()
            .map_err(|e| LlmError::ParseError(format!("Failed to parse response: {}", e)))?;

        Self::parse_response(resp_body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> GeminiClient {
        GeminiClient::new(base_url, "gemini-1.5-flash", "test-key".into(), Duration::from_secs(5))
            .unwrap()
    }

    #[test]
    fn test_client_stores_config() {
        let client = client("https://generativelanguage.googleapis.com");
        assert_eq!(client.base_url, "https://generativelanguage.googleapis.com");
        assert_eq!(client.model, "gemini-1.5-flash");
        assert_eq!(client.api_key, "test-key");
        assert_eq!(client.name(), "google");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = client("https://generativelanguage.googleapis.com/");
        assert_eq!(client.base_url, "https://generativelanguage.googleapis.com");
    }

    #[test]
    fn test_request_serialization() {
        let request = GeminiClient::build_request("list files");
        let parsed = serde_json::to_value(&request).unwrap();
        assert_eq!(parsed["contents"][0]["role"], "user");
        assert_eq!(parsed["contents"][0]["parts"][0]["text"], "list files");
        assert_eq!(parsed["generationConfig"]["temperature"], 0.0);
    }

    #[test]
    fn test_parse_response_joins_parts() {
        let resp: GenerateContentResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "ls "}, {"text": "*.py"}]}
            }]
        }))
        .unwrap();
        assert_eq!(GeminiClient::parse_response(resp).unwrap(), "ls *.py");
    }

    #[test]
    fn test_parse_response_no_candidates() {
        let resp: GenerateContentResponse = serde_json::from_str("{}").unwrap();
        assert!(matches!(
            GeminiClient::parse_response(resp),
            Err(LlmError::ParseError(_))
        ));
    }

    #[test]
    fn test_parse_response_candidate_without_content() {
        // Safety-filtered candidates come back with no content.
        let resp: GenerateContentResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{"finishReason": "SAFETY"}]
        }))
        .unwrap();
        assert!(matches!(
            GeminiClient::parse_response(resp),
            Err(LlmError::EmptyResponse)
        ));
    }

    #[test]
    fn test_connection_error() {
        let client = client("http://127.0.0.1:1");
        let result = client.generate("hello");
        assert!(matches!(result, Err(LlmError::ConnectionError(_))));
    }
}
