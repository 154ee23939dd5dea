use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::{ContentBlock, LlmMessage, LlmProvider, LlmRequest, LlmResponse};

/// Client for any OpenAI-compatible `/chat/completions` endpoint
/// (LM Studio, llama.cpp server, vLLM, OpenAI itself).
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
}

/// What went wrong with a model call, as shown in the error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureKind {
    RateLimit,
    ServerError,
    Timeout,
    Connect,
    AuthError,
    InvalidRequest,
    Unknown,
}

impl FailureKind {
    fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            429 => Self::RateLimit,
            401 | 403 => Self::AuthError,
            400 | 404 | 422 => Self::InvalidRequest,
            500..=599 => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::RateLimit => "rate limited",
            Self::ServerError => "server error",
            Self::Timeout => "timeout",
            Self::Connect => "connect",
            Self::AuthError => "auth",
            Self::InvalidRequest => "invalid request",
            Self::Unknown => "unexpected status",
        }
    }
}

fn llm_error(kind: FailureKind, detail: impl std::fmt::Display) -> anyhow::Error {
    anyhow!("LLM request failed ({}): {detail}", kind.label())
}

impl OpenAiProvider {
    /// No request timeout: a hung model call blocks only the request that made it.
    pub fn new(api_key: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self::with_timeout(api_key, api_base, None)
    }

    pub fn with_timeout(
        api_key: impl Into<String>,
        api_base: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Self {
        let builder = match timeout {
            Some(t) => reqwest::Client::builder().timeout(t),
            None => reqwest::Client::builder(),
        };
        let base = api_base.into();
        Self {
            http: builder.build().unwrap_or_default(),
            api_key: api_key.into(),
            endpoint: format!("{}/chat/completions", base.trim_end_matches('/')),
        }
    }
}

/// Request body for one round. Tool definitions go out in function-calling shape.
pub(crate) fn request_body(request: &LlmRequest) -> Value {
    let mut body = json!({
        "model": request.model,
        "messages": wire_messages(request.system.as_deref(), &request.messages),
        "max_tokens": request.max_tokens,
    });
    if !request.tools.is_empty() {
        body["tools"] = request.tools.iter().map(|t| t.to_openai()).collect();
    }
    body
}

/// One internal message can fan out to several wire messages: the assistant
/// turn carrying its tool calls, then one `tool` message per result.
fn wire_messages(system: Option<&str>, messages: &[LlmMessage]) -> Vec<Value> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    if let Some(system) = system {
        out.push(json!({"role": "system", "content": system}));
    }

    for message in messages {
        let text = message.text();
        let calls: Vec<Value> = message
            .tool_uses()
            .into_iter()
            .map(|(id, name, input)| {
                json!({
                    "id": id,
                    "type": "function",
                    "function": {"name": name, "arguments": input.to_string()},
                })
            })
            .collect();

        if !text.is_empty() || !calls.is_empty() {
            let mut wire = json!({"role": message.role});
            if !text.is_empty() {
                wire["content"] = Value::String(text);
            }
            if !calls.is_empty() {
                wire["tool_calls"] = Value::Array(calls);
            }
            out.push(wire);
        }

        for block in &message.content {
            if let ContentBlock::ToolResult {
                tool_use_id,
                content,
            } = block
            {
                out.push(json!({
                    "role": "tool",
                    "tool_call_id": tool_use_id,
                    "content": content,
                }));
            }
        }
    }
    out
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse> {
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "chat completion request"
        );
        let body = request_body(&request);

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    llm_error(FailureKind::Timeout, e)
                } else if e.is_connect() {
                    llm_error(FailureKind::Connect, e)
                } else {
                    anyhow::Error::new(e).context("LLM request failed")
                }
            })?;

        let status = resp.status();
        let raw = resp.text().await.context("failed to read LLM response body")?;
        if status != StatusCode::OK {
            return Err(status_error(status, &raw));
        }

        let completion: Completion =
            serde_json::from_str(&raw).context("malformed chat completion")?;
        completion.into_response()
    }
}

fn status_error(status: StatusCode, raw: &str) -> anyhow::Error {
    let kind = FailureKind::from_status(status);
    match serde_json::from_str::<ErrorEnvelope>(raw) {
        Ok(envelope) if envelope.error.kind.is_empty() => {
            llm_error(kind, format!("{status}: {}", envelope.error.message))
        }
        Ok(envelope) => llm_error(
            kind,
            format!(
                "{status}: {} ({})",
                envelope.error.message, envelope.error.kind
            ),
        ),
        Err(_) => llm_error(kind, status),
    }
}

#[derive(Debug, Deserialize)]
struct Completion {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}

impl Completion {
    fn into_response(self) -> Result<LlmResponse> {
        let usage = self.usage;
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("chat completion had no choices"))?;

        let text = choice.message.content.unwrap_or_default();
        let mut content = Vec::new();
        if !text.is_empty() {
            content.push(ContentBlock::Text { text: text.clone() });
        }
        for call in choice.message.tool_calls.unwrap_or_default() {
            content.push(ContentBlock::ToolUse {
                id: call.id,
                name: call.function.name,
                input: parse_arguments(&call.function.arguments),
            });
        }

        let stop_reason = match choice.finish_reason.as_deref() {
            Some("tool_calls") => Some("tool_use".to_string()),
            Some("stop") => Some("end_turn".to_string()),
            _ => choice.finish_reason,
        };

        Ok(LlmResponse {
            text,
            content,
            input_tokens: usage.as_ref().map(|u| u.prompt_tokens),
            output_tokens: usage.as_ref().map(|u| u.completion_tokens),
            stop_reason,
        })
    }
}

/// Local models sometimes emit malformed or non-object arguments; those become `{}`.
fn parse_arguments(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ Value::Object(_)) => v,
        _ => Value::Object(Default::default()),
    }
}
