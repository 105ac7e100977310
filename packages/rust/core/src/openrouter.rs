//! OpenRouter extraction collaborator.
//!
//! Sends the system prompt, the user prompt, and the assembled context to an
//! OpenAI-compatible `/chat/completions` endpoint and parses the reply as
//! JSON. With a schema the request asks for `json_schema` output (strict when
//! requested); without one it asks for a plain JSON object.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, instrument};

use webextract_shared::{
    Completion, CompletionOptions, ExtractError, Extractor, OpenRouterConfig, Result, RunId,
};

/// Schema name reported to the provider for structured output.
const SCHEMA_NAME: &str = "extraction";

/// Warning attached when the model stopped at its token limit.
const TRUNCATED_WARNING: &str =
    "The extraction output was truncated because the model reached its token limit.";

/// Extractor backed by the OpenRouter chat completions API.
#[derive(Debug, Clone)]
pub struct OpenRouterExtractor {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OpenRouterExtractor {
    pub fn new(api_key: &str, config: &OpenRouterConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| ExtractError::config("invalid API key format"))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert("X-Title", HeaderValue::from_static("webextract"));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| ExtractError::config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.default_model.clone(),
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage>,
    temperature: f32,
    response_format: Value,
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatApiResponse {
    choices: Option<Vec<Choice>>,
    usage: Option<Usage>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
}

fn response_format(schema: Option<&Value>, strict: bool) -> Value {
    match schema {
        Some(schema) => json!({
            "type": "json_schema",
            "json_schema": {
                "name": SCHEMA_NAME,
                "strict": strict,
                "schema": schema,
            }
        }),
        None => json!({ "type": "json_object" }),
    }
}

fn user_message(prompt: &str, context: &str, previous: Option<&Value>) -> String {
    let mut content = format!("{prompt}\n\nContent:\n{context}");
    if let Some(previous) = previous {
        content.push_str("\n\nPrevious extraction to refine:\n");
        content.push_str(&previous.to_string());
    }
    content
}

/// Parse model output as JSON, keeping non-JSON replies as a string.
fn parse_extract(content: &str) -> Option<Value> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return None;
    }
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed);

    Some(serde_json::from_str(unfenced).unwrap_or_else(|_| Value::String(trimmed.to_string())))
}

#[async_trait]
impl Extractor for OpenRouterExtractor {
    #[instrument(skip_all, fields(run_id = %run_id, model = %self.model, context_len = context.len()))]
    async fn extract(
        &self,
        run_id: &RunId,
        options: &CompletionOptions,
        context: &str,
        previous: Option<&Value>,
        strict: bool,
    ) -> Result<Completion> {
        let start = Instant::now();

        let request = ChatApiRequest {
            model: &self.model,
            messages: vec![
                ApiMessage {
                    role: "system",
                    content: options.system_prompt.clone(),
                },
                ApiMessage {
                    role: "user",
                    content: user_message(&options.prompt, context, previous),
                },
            ],
            temperature: 0.0,
            response_format: response_format(options.schema.as_ref(), strict),
        };

        let response = self
            .client
            .post(self.chat_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| ExtractError::Extraction(format!("request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExtractError::Extraction(format!("failed to read response: {e}")))?;
        let parsed: Option<ChatApiResponse> = serde_json::from_str(&body).ok();

        if !status.is_success() {
            let message = parsed
                .and_then(|p| p.error)
                .and_then(|e| e.message)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(ExtractError::Extraction(format!(
                "openrouter returned {status}: {message}"
            )));
        }

        let parsed =
            parsed.ok_or_else(|| ExtractError::Extraction("invalid JSON response".into()))?;
        if let Some(error) = parsed.error {
            return Err(ExtractError::Extraction(
                error.message.unwrap_or_else(|| "unknown provider error".into()),
            ));
        }

        let choice = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| ExtractError::Extraction("no choices in response".into()))?;

        let content = choice.message.and_then(|m| m.content).unwrap_or_default();
        let warning = (choice.finish_reason.as_deref() == Some("length"))
            .then(|| TRUNCATED_WARNING.to_string());

        let num_tokens = parsed.usage.and_then(|u| {
            u.total_tokens.or(match (u.prompt_tokens, u.completion_tokens) {
                (None, None) => None,
                (p, c) => Some(p.unwrap_or(0) + c.unwrap_or(0)),
            })
        });

        debug!(content_len = content.len(), "completion received");
        info!(
            num_tokens = num_tokens.unwrap_or(0),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "extraction complete"
        );

        Ok(Completion {
            extract: parse_extract(&content),
            num_tokens,
            warning,
        })
    }
}
