//! OpenAI-compatible chat completions client.
//!
//! The engine talks to the model through the [`ChatBackend`] trait so the
//! protocol loop can be driven by a scripted backend in tests. The real
//! implementation is [`HttpBackend`], with retry on transient failures.

use super::tools::{ToolCall, ToolDefinition};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MAX_ERROR_CONTENT_LEN: usize = 200;

/// Retry configuration for transient API failures.
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 2000;
const BACKOFF_MULTIPLIER: u64 = 2;

fn truncate_str(content: &str, max_len: usize) -> &str {
    match content.char_indices().nth(max_len) {
        Some((idx, _)) => &content[..idx],
        None => content,
    }
}

/// Sanitize API response content for error messages to prevent credential
/// leakage.
fn sanitize_api_response(content: &str) -> String {
    const SECRET_PATTERNS: &[&str] = &[
        "api_key",
        "apikey",
        "secret",
        "password",
        "credential",
        "bearer",
        "sk-",
    ];

    let truncated = truncate_str(content, MAX_ERROR_CONTENT_LEN);

    let lower = truncated.to_lowercase();
    for pattern in SECRET_PATTERNS {
        if lower.contains(pattern) {
            return "(response details redacted - may contain sensitive data)".to_string();
        }
    }

    truncated.to_string()
}

fn push_unique_candidate(candidates: &mut Vec<String>, candidate: impl Into<String>) {
    let candidate = candidate.into();
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return;
    }
    if !candidates.iter().any(|existing| existing == trimmed) {
        candidates.push(trimmed.to_string());
    }
}

fn strip_markdown_fences(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if !trimmed.starts_with("```") {
        return None;
    }
    let without_open = trimmed.strip_prefix("```")?;
    let after_header = if let Some(newline_idx) = without_open.find('\n') {
        &without_open[newline_idx + 1..]
    } else {
        without_open
    };
    let end_idx = after_header.rfind("```")?;
    Some(after_header[..end_idx].trim().to_string())
}

fn extract_balanced_json_from(content: &str, start: usize) -> Option<String> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in content[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
                continue;
            }
            if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(ch) {
                    return None;
                }
                if stack.is_empty() {
                    let end = start + offset + ch.len_utf8();
                    return Some(content[start..end].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn extract_json_candidates(content: &str, max_candidates: usize) -> Vec<String> {
    let mut out = Vec::new();
    if max_candidates == 0 {
        return out;
    }
    for (idx, ch) in content.char_indices() {
        if ch == '{' || ch == '[' {
            if let Some(candidate) = extract_balanced_json_from(content, idx) {
                push_unique_candidate(&mut out, candidate);
                if out.len() >= max_candidates {
                    break;
                }
            }
        }
    }
    out
}

/// Parse a typed value out of model text, salvaging common wrappers
/// (markdown fences, prose around the JSON) before giving up.
pub fn parse_structured_content<T>(content: &str) -> anyhow::Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let mut candidates = Vec::new();
    push_unique_candidate(&mut candidates, content);
    if let Some(stripped) = strip_markdown_fences(content) {
        push_unique_candidate(&mut candidates, stripped);
    }

    let mut idx = 0usize;
    while idx < candidates.len() {
        let current = candidates[idx].clone();
        for extracted in extract_json_candidates(&current, 4) {
            push_unique_candidate(&mut candidates, extracted);
        }
        idx += 1;
    }

    let mut last_err: Option<String> = None;
    for candidate in candidates {
        match serde_json::from_str::<T>(&candidate) {
            Ok(data) => return Ok(data),
            Err(err) => last_err = Some(err.to_string()),
        }
    }

    Err(anyhow::anyhow!(
        "Failed to parse structured response: {}\nContent: {}",
        last_err.unwrap_or_else(|| "unknown parse error".to_string()),
        sanitize_api_response(content)
    ))
}

/// One message in the conversation transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message {
            role: "system".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message {
            role: "user".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Assistant turn that requested tool calls; echoed back into the
    /// transcript so the follow-up tool results have an antecedent.
    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Message {
            role: "assistant".to_string(),
            content: None,
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Message {
            role: "tool".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// Whether the model may call tools on this turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    Auto,
    None,
}

/// Response format configuration: simple JSON mode or structured output
/// with a strict schema.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub format_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_schema: Option<JsonSchemaWrapper>,
}

impl ResponseFormat {
    pub fn json_schema(name: &str, schema: serde_json::Value) -> Self {
        ResponseFormat {
            format_type: "json_schema".to_string(),
            json_schema: Some(JsonSchemaWrapper {
                name: name.to_string(),
                strict: true,
                schema,
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonSchemaWrapper {
    pub name: String,
    pub strict: bool,
    pub schema: serde_json::Value,
}

/// A single chat completions request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    /// Content can be null when the model answers with tool calls or when
    /// a refusal occurred.
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
    #[serde(default)]
    refusal: Option<String>,
}

/// What the model produced for one turn.
#[derive(Debug, Clone)]
pub enum ChatOutcome {
    /// Plain text answer.
    Message { content: String },
    /// The model requested one or more tool invocations.
    ToolCalls(Vec<ToolCall>),
}

/// Seam between the protocol loop and the model.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> anyhow::Result<ChatOutcome>;
}

/// `ChatBackend` over an OpenAI-compatible HTTP API.
pub struct HttpBackend {
    client: reqwest::Client,
    completions_url: String,
    api_key: String,
}

impl HttpBackend {
    pub fn new(api_base_url: &str, api_key: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;
        let completions_url = format!("{}/chat/completions", api_base_url.trim_end_matches('/'));
        Ok(HttpBackend {
            client,
            completions_url,
            api_key,
        })
    }
}

fn backoff_secs(retry_count: u32) -> u64 {
    let factor = BACKOFF_MULTIPLIER.pow(retry_count.saturating_sub(1));
    let ms = INITIAL_BACKOFF_MS.saturating_mul(factor);
    let secs = ms / 1000;
    if secs == 0 {
        1
    } else {
        secs
    }
}

fn is_retryable_network_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

/// Send a request with automatic retry on transient failures: network
/// errors, rate limits (429) and server errors (5xx). Returns the response
/// body text on success.
async fn send_with_retry(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    request_body: &ChatRequest,
) -> anyhow::Result<String> {
    let mut last_error = String::new();
    let mut retry_count = 0;

    while retry_count <= MAX_RETRIES {
        let response = match client
            .post(url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", api_key))
            .json(request_body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                last_error = err.to_string();
                if is_retryable_network_error(&err) && retry_count < MAX_RETRIES {
                    retry_count += 1;
                    tokio::time::sleep(Duration::from_secs(backoff_secs(retry_count))).await;
                    continue;
                }
                return Err(anyhow::anyhow!("API request failed: {}", err));
            }
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(err) => {
                last_error = err.to_string();
                if is_retryable_network_error(&err) && retry_count < MAX_RETRIES {
                    retry_count += 1;
                    tokio::time::sleep(Duration::from_secs(backoff_secs(retry_count))).await;
                    continue;
                }
                return Err(anyhow::anyhow!("Failed to read API response: {}", err));
            }
        };

        if status.is_success() {
            return Ok(text);
        }

        last_error = text.clone();

        if (status.as_u16() == 429 || status.is_server_error()) && retry_count < MAX_RETRIES {
            retry_count += 1;
            tokio::time::sleep(Duration::from_secs(backoff_secs(retry_count))).await;
            continue;
        }

        let error_msg = match status.as_u16() {
            401 => "Invalid API key. Set DEVSCOPE_API_KEY and try again.".to_string(),
            429 => format!(
                "Rate limited by the API after {} retries. Try again in a few minutes.",
                retry_count
            ),
            500..=599 => format!(
                "API server error ({}). The service may be temporarily unavailable.",
                status
            ),
            _ => format!("API error {}: {}", status, sanitize_api_response(&text)),
        };
        return Err(anyhow::anyhow!("{}", error_msg));
    }

    Err(anyhow::anyhow!("{}", last_error))
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn complete(&self, request: ChatRequest) -> anyhow::Result<ChatOutcome> {
        let text = send_with_retry(&self.client, &self.completions_url, &self.api_key, &request)
            .await?;

        let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
            anyhow::anyhow!(
                "Failed to parse API response: {}\n{}",
                e,
                sanitize_api_response(&text)
            )
        })?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("API returned no choices"))?;

        if let Some(refusal) = &choice.message.refusal {
            return Err(anyhow::anyhow!(
                "Request was refused: {}",
                truncate_str(refusal, 200)
            ));
        }

        if let Some(calls) = choice.message.tool_calls {
            if !calls.is_empty() {
                return Ok(ChatOutcome::ToolCalls(calls));
            }
        }

        let content = choice.message.content.unwrap_or_default();
        if content.is_empty() {
            return Err(anyhow::anyhow!(
                "API returned empty response. The model may have failed to generate content."
            ));
        }

        Ok(ChatOutcome::Message { content })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devscope_core::{MergeCategory, Verdict};

    #[test]
    fn test_parse_structured_content_plain_json() {
        let raw = r#"{"hiddenReasoning":"","type":"Refactor","issues":[],"effortEstimate":"Minor"}"#;
        let verdict: Verdict = parse_structured_content(raw).unwrap();
        assert_eq!(verdict.category, MergeCategory::Refactor);
    }

    #[test]
    fn test_parse_structured_content_fenced_json() {
        let raw = "```json\n{\"hiddenReasoning\":\"\",\"type\":\"Feature\",\"issues\":[],\"effortEstimate\":\"Major\"}\n```";
        let verdict: Verdict = parse_structured_content(raw).unwrap();
        assert_eq!(verdict.category, MergeCategory::Feature);
    }

    #[test]
    fn test_parse_structured_content_json_with_prose() {
        let raw = "Here is my verdict:\n{\"hiddenReasoning\":\"x\",\"type\":\"Bug-fix\",\"issues\":[],\"effortEstimate\":\"Trivial\"} hope that helps";
        let verdict: Verdict = parse_structured_content(raw).unwrap();
        assert_eq!(verdict.category, MergeCategory::BugFix);
    }

    #[test]
    fn test_parse_structured_content_garbage_fails() {
        assert!(parse_structured_content::<Verdict>("not json at all").is_err());
    }

    #[test]
    fn test_backoff_grows() {
        assert_eq!(backoff_secs(1), 2);
        assert_eq!(backoff_secs(2), 4);
        assert_eq!(backoff_secs(3), 8);
    }

    #[test]
    fn test_tool_choice_wire_strings() {
        assert_eq!(serde_json::to_string(&ToolChoice::Auto).unwrap(), "\"auto\"");
        assert_eq!(serde_json::to_string(&ToolChoice::None).unwrap(), "\"none\"");
    }

    #[test]
    fn test_request_omits_empty_fields() {
        let request = ChatRequest {
            model: "gpt-4o".to_string(),
            messages: vec![Message::system("s"), Message::user("u")],
            tools: None,
            tool_choice: None,
            response_format: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("tools").is_none());
        assert!(value.get("tool_choice").is_none());
        assert!(value.get("response_format").is_none());
        assert!(value["messages"][0].get("tool_calls").is_none());
    }
}
