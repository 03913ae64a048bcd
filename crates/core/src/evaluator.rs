use anyhow::{Context, Result};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash-001";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";

/// One structured-generation call: the model must answer with a JSON value
/// matching `schema`.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationRequest {
    pub system: String,
    pub prompt: String,
    pub schema_name: String,
    pub schema: Value,
}

/// A trait abstracting the generative-AI provider used to score interviews.
///
/// Implementations only transport the request and hand back the model's JSON.
/// Validating that JSON against the domain rules is the caller's job.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn generate_object(&self, request: &EvaluationRequest) -> Result<Value>;
}

// --- Gemini ---

pub struct GeminiEvaluator {
    client: Client,
    api_key: SecretString,
    model: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

impl GeminiEvaluator {
    pub fn new(api_key: SecretString, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            base_url: "https://generativelanguage.googleapis.com".to_string(),
        }
    }
}

#[async_trait]
impl Evaluator for GeminiEvaluator {
    async fn generate_object(&self, request: &EvaluationRequest) -> Result<Value> {
        let body = json!({
            "systemInstruction": { "parts": [{ "text": request.system }] },
            "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": gemini_schema(&request.schema),
            }
        });

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .context("Gemini request failed")?
            .error_for_status()
            .context("Gemini rejected the request")?
            .json::<GeminiResponse>()
            .await
            .context("Failed to decode Gemini response")?;

        let text: String = resp
            .candidates
            .first()
            .ok_or_else(|| anyhow::anyhow!("No response from LLM"))?
            .content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();

        serde_json::from_str(&text).map_err(|e| anyhow::anyhow!("Failed to parse LLM response: {e}"))
    }
}

/// Gemini accepts an OpenAPI subset of JSON Schema without `additionalProperties`.
fn gemini_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| k.as_str() != "additionalProperties")
                .map(|(k, v)| (k.clone(), gemini_schema(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(gemini_schema).collect()),
        other => other.clone(),
    }
}

// --- OpenAI ---

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: Message,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub content: String,
}

pub struct OpenAiEvaluator {
    client: Client,
    api_key: SecretString,
    model: String,
}

impl OpenAiEvaluator {
    pub fn new(api_key: SecretString, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
        }
    }
}

#[async_trait]
impl Evaluator for OpenAiEvaluator {
    async fn generate_object(&self, request: &EvaluationRequest) -> Result<Value> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.prompt }
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": request.schema_name,
                    "strict": true,
                    "schema": request.schema,
                }
            },
            "temperature": 0.2
        });

        let resp = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .context("OpenAI request failed")?
            .error_for_status()
            .context("OpenAI rejected the request")?
            .json::<LlmResponse>()
            .await
            .context("Failed to decode OpenAI response")?;

        let answer = &resp
            .choices
            .first()
            .ok_or_else(|| anyhow::anyhow!("No response from LLM"))?
            .message
            .content;
        serde_json::from_str(answer).map_err(|e| anyhow::anyhow!("Failed to parse LLM response: {e}"))
    }
}
