//! LLM client abstraction.
//!
//! Generic interface for chat completion and text embedding against an
//! Ollama or OpenAI-compatible endpoint, plus a fake client for testing.
//! Calls are blocking; the daemon dispatches them through
//! `tokio::task::spawn_blocking` so they never stall the scheduler.

use crate::config::LlmConfig;
use serde_json::Value;
use std::time::Duration;

/// LLM errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request timeout after {0} seconds")]
    Timeout(u64),

    #[error("LLM returned empty response")]
    EmptyResponse,
}

/// Generic LLM client trait
pub trait LlmClient: Send + Sync {
    /// Chat completion: system + user prompt against the named model.
    fn chat(&self, model: &str, system_prompt: &str, user_prompt: &str)
        -> Result<String, LlmError>;

    /// Embed a text with the named embedding model.
    fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>, LlmError>;

    /// Cheap reachability probe for status reporting.
    fn is_available(&self) -> bool {
        true
    }
}

/// Real LLM client implementation using HTTP
pub struct HttpLlmClient {
    config: LlmConfig,
    client: reqwest::blocking::Client,
}

impl HttpLlmClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::HttpError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Check if endpoint is Ollama-style
    fn is_ollama_endpoint(&self) -> bool {
        self.config.endpoint.contains("11434") || self.config.endpoint.contains("ollama")
    }

    fn map_send_error(&self, e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout(self.config.timeout_secs)
        } else {
            LlmError::HttpError(format!("Request failed: {}", e))
        }
    }

    /// Ollama chat API: POST /api/chat
    fn chat_ollama(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, LlmError> {
        let url = format!("{}/api/chat", self.config.endpoint);

        let request_body = serde_json::json!({
            "model": model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
            "stream": false,
        });

        let response = self
            .client
            .post(&url)
            .json(&request_body)
            .send()
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            return Err(LlmError::HttpError(format!(
                "HTTP {} from Ollama",
                response.status()
            )));
        }

        let response_json: Value = response
            .json()
            .map_err(|e| LlmError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        let text = response_json
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .ok_or(LlmError::EmptyResponse)?;

        if text.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(text.to_string())
    }

    /// OpenAI-compatible chat API: POST /v1/chat/completions
    fn chat_openai_compatible(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, LlmError> {
        let url = format!("{}/v1/chat/completions", self.config.endpoint);

        let request_body = serde_json::json!({
            "model": model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
        });

        let mut request = self.client.post(&url).json(&request_body);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            return Err(LlmError::HttpError(format!(
                "HTTP {} from OpenAI-compatible API",
                response.status()
            )));
        }

        let response_json: Value = response
            .json()
            .map_err(|e| LlmError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        let text = response_json
            .get("choices")
            .and_then(|v| v.get(0))
            .and_then(|v| v.get("message"))
            .and_then(|v| v.get("content"))
            .and_then(|v| v.as_str())
            .ok_or(LlmError::EmptyResponse)?;

        if text.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(text.to_string())
    }

    /// Ollama embedding API: POST /api/embed
    fn embed_ollama(&self, model: &str, text: &str) -> Result<Vec<f32>, LlmError> {
        let url = format!("{}/api/embed", self.config.endpoint);

        let request_body = serde_json::json!({
            "model": model,
            "input": text,
        });

        let response = self
            .client
            .post(&url)
            .json(&request_body)
            .send()
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            return Err(LlmError::HttpError(format!(
                "HTTP {} from Ollama",
                response.status()
            )));
        }

        let response_json: Value = response
            .json()
            .map_err(|e| LlmError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        parse_embedding(
            response_json
                .get("embeddings")
                .and_then(|v| v.get(0))
                .ok_or(LlmError::EmptyResponse)?,
        )
    }

    /// OpenAI-compatible embedding API: POST /v1/embeddings
    fn embed_openai_compatible(&self, model: &str, text: &str) -> Result<Vec<f32>, LlmError> {
        let url = format!("{}/v1/embeddings", self.config.endpoint);

        let request_body = serde_json::json!({
            "model": model,
            "input": text,
        });

        let mut request = self.client.post(&url).json(&request_body);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            return Err(LlmError::HttpError(format!(
                "HTTP {} from OpenAI-compatible API",
                response.status()
            )));
        }

        let response_json: Value = response
            .json()
            .map_err(|e| LlmError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        parse_embedding(
            response_json
                .get("data")
                .and_then(|v| v.get(0))
                .and_then(|v| v.get("embedding"))
                .ok_or(LlmError::EmptyResponse)?,
        )
    }
}

/// Parse a JSON array of numbers into an embedding vector
fn parse_embedding(value: &Value) -> Result<Vec<f32>, LlmError> {
    let arr = value
        .as_array()
        .ok_or_else(|| LlmError::InvalidResponse("embedding is not an array".to_string()))?;

    let mut vec = Vec::with_capacity(arr.len());
    for v in arr {
        let f = v
            .as_f64()
            .ok_or_else(|| LlmError::InvalidResponse("non-numeric embedding value".to_string()))?;
        vec.push(f as f32);
    }

    if vec.is_empty() {
        return Err(LlmError::EmptyResponse);
    }
    Ok(vec)
}

impl LlmClient for HttpLlmClient {
    fn is_available(&self) -> bool {
        let url = if self.is_ollama_endpoint() {
            format!("{}/api/tags", self.config.endpoint)
        } else {
            format!("{}/v1/models", self.config.endpoint)
        };
        self.client
            .get(&url)
            .send()
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn chat(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, LlmError> {
        if self.is_ollama_endpoint() {
            match self.chat_ollama(model, system_prompt, user_prompt) {
                Ok(text) => return Ok(text),
                Err(e) => {
                    tracing::debug!("Ollama API failed, trying OpenAI-compatible: {}", e);
                }
            }
        }
        self.chat_openai_compatible(model, system_prompt, user_prompt)
    }

    fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>, LlmError> {
        if self.is_ollama_endpoint() {
            match self.embed_ollama(model, text) {
                Ok(vec) => return Ok(vec),
                Err(e) => {
                    tracing::debug!("Ollama embed failed, trying OpenAI-compatible: {}", e);
                }
            }
        }
        self.embed_openai_compatible(model, text)
    }
}

/// Fake LLM client for testing
pub struct FakeLlmClient {
    chat_responses: std::sync::Mutex<Vec<Result<String, LlmError>>>,
    embed_responses: std::sync::Mutex<Vec<Result<Vec<f32>, LlmError>>>,
    chat_count: std::sync::Mutex<usize>,
    embed_count: std::sync::Mutex<usize>,
    chat_prompts: std::sync::Mutex<Vec<(String, String)>>,
}

impl FakeLlmClient {
    /// Create a fake client with pre-defined chat responses
    pub fn new(chat_responses: Vec<Result<String, LlmError>>) -> Self {
        Self {
            chat_responses: std::sync::Mutex::new(chat_responses),
            embed_responses: std::sync::Mutex::new(vec![]),
            chat_count: std::sync::Mutex::new(0),
            embed_count: std::sync::Mutex::new(0),
            chat_prompts: std::sync::Mutex::new(vec![]),
        }
    }

    /// Set the scripted embedding responses
    pub fn with_embeddings(self, embed_responses: Vec<Result<Vec<f32>, LlmError>>) -> Self {
        *self.embed_responses.lock().unwrap() = embed_responses;
        self
    }

    /// Create a fake client that always returns the same chat text
    pub fn always(text: &str) -> Self {
        Self::new(vec![Ok(text.to_string())])
    }

    /// Create a fake client whose chat calls always fail
    pub fn always_error(error: LlmError) -> Self {
        Self::new(vec![Err(error)])
    }

    /// Number of chat calls made
    pub fn chat_count(&self) -> usize {
        *self.chat_count.lock().unwrap()
    }

    /// Number of embed calls made
    pub fn embed_count(&self) -> usize {
        *self.embed_count.lock().unwrap()
    }

    /// The (system, user) prompts seen by chat calls, in order
    pub fn chat_prompts(&self) -> Vec<(String, String)> {
        self.chat_prompts.lock().unwrap().clone()
    }
}

impl LlmClient for FakeLlmClient {
    fn chat(
        &self,
        _model: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, LlmError> {
        let mut count = self.chat_count.lock().unwrap();
        *count += 1;
        self.chat_prompts
            .lock()
            .unwrap()
            .push((system_prompt.to_string(), user_prompt.to_string()));

        let mut responses = self.chat_responses.lock().unwrap();
        if responses.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        if responses.len() == 1 {
            // Keep returning the same response
            responses[0].clone()
        } else {
            responses.remove(0)
        }
    }

    fn embed(&self, _model: &str, _text: &str) -> Result<Vec<f32>, LlmError> {
        let mut count = self.embed_count.lock().unwrap();
        *count += 1;

        let mut responses = self.embed_responses.lock().unwrap();
        if responses.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        if responses.len() == 1 {
            responses[0].clone()
        } else {
            responses.remove(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_client_always() {
        let client = FakeLlmClient::always("SELECT 1");
        let r1 = client.chat("m", "s", "u").unwrap();
        assert_eq!(r1, "SELECT 1");
        let r2 = client.chat("m", "s", "u").unwrap();
        assert_eq!(r2, "SELECT 1");
        assert_eq!(client.chat_count(), 2);
    }

    #[test]
    fn test_fake_client_always_error() {
        let client = FakeLlmClient::always_error(LlmError::EmptyResponse);
        assert!(client.chat("m", "s", "u").is_err());
        assert_eq!(client.chat_count(), 1);
    }

    #[test]
    fn test_fake_client_sequence() {
        let client = FakeLlmClient::new(vec![
            Ok("first".to_string()),
            Err(LlmError::Timeout(60)),
            Ok("third".to_string()),
        ]);
        assert_eq!(client.chat("m", "s", "u").unwrap(), "first");
        assert!(client.chat("m", "s", "u").is_err());
        assert_eq!(client.chat("m", "s", "u").unwrap(), "third");
        assert_eq!(client.chat_count(), 3);
    }

    #[test]
    fn test_fake_client_embeddings() {
        let client =
            FakeLlmClient::always("x").with_embeddings(vec![Ok(vec![3.0, 4.0])]);
        let vec = client.embed("embed-model", "hello").unwrap();
        assert_eq!(vec, vec![3.0, 4.0]);
        assert_eq!(client.embed_count(), 1);
        assert_eq!(client.chat_count(), 0);
    }

    #[test]
    fn test_parse_embedding() {
        let value = serde_json::json!([0.1, 0.2, 0.3]);
        let vec = parse_embedding(&value).unwrap();
        assert_eq!(vec.len(), 3);
    }

    #[test]
    fn test_parse_embedding_rejects_non_numeric() {
        let value = serde_json::json!(["a", "b"]);
        assert!(parse_embedding(&value).is_err());
    }

    #[test]
    fn test_is_ollama_endpoint() {
        let client = HttpLlmClient::new(LlmConfig::default()).unwrap();
        assert!(client.is_ollama_endpoint());

        let mut config = LlmConfig::default();
        config.endpoint = "https://api.example.com".to_string();
        let client = HttpLlmClient::new(config).unwrap();
        assert!(!client.is_ollama_endpoint());
    }
}
