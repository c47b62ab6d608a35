//! Model transport.
//!
//! [`ModelTransport`] is the seam between the gateway's fallback logic and a
//! provider endpoint: one `call` with a hard timeout, returning either a
//! reply with token counts or a typed [`TransportError`].  [`HttpTransport`]
//! speaks the **Anthropic Messages API** and the **OpenAI Chat Completions
//! API** (including OpenAI-compatible endpoints), non-streaming.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};

use crate::chat::{ChatRequest, Role, ToolCall, ToolDefinition};
use crate::gateway::tier::Provider;

/// Default Anthropic API base URL.
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

/// Default OpenAI API base URL.
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

// ---------------------------------------------------------------------------
// Transport contract
// ---------------------------------------------------------------------------

/// Token counts as reported by the provider for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenCounts {
    /// Billed prompt tokens.
    pub input_tokens: u32,
    /// Billed completion tokens.
    pub output_tokens: u32,
}

/// What the model produced for one call.
#[derive(Debug, Clone)]
pub enum ModelReply {
    /// Plain text output.
    Text(String),
    /// The model wants one or more tools invoked before continuing
    /// (native function-calling tiers only).
    ToolCalls(Vec<ToolCall>),
}

/// A successful transport call.
#[derive(Debug, Clone)]
pub struct TransportReply {
    /// The model's output.
    pub reply: ModelReply,
    /// Provider-reported token counts.
    pub tokens: TokenCounts,
}

/// Typed failure from a transport call.
///
/// Only transient variants trigger tier fallback; [`Self::ContentRejected`]
/// propagates immediately and the call is over.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The call did not complete within its latency budget.
    #[error("transport timed out after {0:?}")]
    Timeout(Duration),

    /// The provider returned HTTP 429.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The provider returned a 5xx status.
    #[error("server error: {0}")]
    Server(String),

    /// Connection-level or other request failure.
    #[error("network error: {0}")]
    Network(String),

    /// The provider refused the request on content-policy grounds.
    /// Non-transient: never retried on another tier.
    #[error("content rejected: {0}")]
    ContentRejected(String),

    /// The provider answered but the body could not be understood.
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Whether this failure should advance the gateway to the next tier.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::ContentRejected(_))
    }
}

/// One provider endpoint the gateway can send a prompt to.
///
/// Implementations must respect `timeout` and must not leak background work
/// after returning; the gateway additionally races every call against
/// cancellation.
#[async_trait]
pub trait ModelTransport: Send + Sync {
    /// Send a fully-formed request, bounded by `timeout`.
    async fn call(
        &self,
        request: &ChatRequest,
        timeout: Duration,
    ) -> Result<TransportReply, TransportError>;
}

// ---------------------------------------------------------------------------
// HTTP transport
// ---------------------------------------------------------------------------

/// HTTP transport for one provider endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    provider: Provider,
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport for the given provider, with an optional base
    /// URL override for compatible endpoints.
    pub fn new(
        provider: Provider,
        api_key: impl Into<String>,
        base_url: Option<String>,
    ) -> Result<Self, TransportError> {
        let base_url = base_url.unwrap_or_else(|| {
            match provider {
                Provider::Anthropic => ANTHROPIC_BASE_URL,
                Provider::OpenAi => OPENAI_BASE_URL,
            }
            .to_owned()
        });

        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            provider,
            api_key: api_key.into(),
            base_url,
            http,
        })
    }

    async fn send_json(
        &self,
        url: &str,
        headers: HeaderMap,
        body: &Value,
        timeout: Duration,
    ) -> Result<(StatusCode, String), TransportError> {
        let resp = self
            .http
            .post(url)
            .headers(headers)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(timeout)
                } else {
                    TransportError::Network(e.to_string())
                }
            })?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| TransportError::Network(format!("failed to read response body: {e}")))?;
        Ok((status, text))
    }

    /// Map a non-success HTTP status into a typed transport error.
    fn classify_failure(status: StatusCode, body: &str) -> TransportError {
        if status == StatusCode::TOO_MANY_REQUESTS {
            return TransportError::RateLimited(body_snippet(body));
        }
        if status.is_server_error() {
            return TransportError::Server(format!("{status}: {}", body_snippet(body)));
        }
        // Providers signal moderation refusals as 4xx with an explanatory
        // body; anything else 4xx (bad key, bad request) is a plain network
        // failure and may still succeed on another tier.
        let lower = body.to_lowercase();
        if lower.contains("content_policy")
            || lower.contains("content policy")
            || lower.contains("moderation")
            || lower.contains("safety")
        {
            return TransportError::ContentRejected(body_snippet(body));
        }
        TransportError::Network(format!("{status}: {}", body_snippet(body)))
    }

    // -- Anthropic -----------------------------------------------------------

    async fn call_anthropic(
        &self,
        request: &ChatRequest,
        timeout: Duration,
    ) -> Result<TransportReply, TransportError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = build_anthropic_body(request);

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| TransportError::Network(format!("invalid API key header: {e}")))?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        tracing::debug!(url = %url, model = %body["model"], provider = "anthropic", "sending model request");

        let (status, text) = self.send_json(&url, headers, &body, timeout).await?;
        if !status.is_success() {
            return Err(Self::classify_failure(status, &text));
        }

        let v: Value = serde_json::from_str(&text)
            .map_err(|e| TransportError::Malformed(format!("invalid JSON response: {e}")))?;
        parse_anthropic_response(&v)
    }

    // -- OpenAI --------------------------------------------------------------

    async fn call_openai(
        &self,
        request: &ChatRequest,
        timeout: Duration,
    ) -> Result<TransportReply, TransportError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = build_openai_body(request);

        let mut headers = HeaderMap::new();
        let auth_value = format!("Bearer {}", self.api_key);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth_value).map_err(|e| {
                TransportError::Network(format!("invalid authorization header: {e}"))
            })?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        tracing::debug!(url = %url, model = %body["model"], provider = "openai", "sending model request");

        let (status, text) = self.send_json(&url, headers, &body, timeout).await?;
        if !status.is_success() {
            return Err(Self::classify_failure(status, &text));
        }

        let v: Value = serde_json::from_str(&text)
            .map_err(|e| TransportError::Malformed(format!("invalid JSON response: {e}")))?;
        parse_openai_response(&v)
    }
}

#[async_trait]
impl ModelTransport for HttpTransport {
    async fn call(
        &self,
        request: &ChatRequest,
        timeout: Duration,
    ) -> Result<TransportReply, TransportError> {
        match self.provider {
            Provider::Anthropic => self.call_anthropic(request, timeout).await,
            Provider::OpenAi => self.call_openai(request, timeout).await,
        }
    }
}

fn body_snippet(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() > 300 {
        let mut end = 300;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &trimmed[..end])
    } else {
        trimmed.to_owned()
    }
}

// ===========================================================================
// Anthropic wire format
// ===========================================================================

/// Build the JSON body for the Anthropic Messages API.
///
/// The system message is split out (Anthropic expects it as a top-level
/// field, not in the `messages` array); image payloads attach to the final
/// user message.
fn build_anthropic_body(request: &ChatRequest) -> Value {
    let mut system: Option<String> = None;
    let mut wire_messages: Vec<Value> = Vec::with_capacity(request.messages.len());

    for msg in &request.messages {
        match msg.role {
            Role::System => match &mut system {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(&msg.content);
                }
                None => system = Some(msg.content.clone()),
            },
            Role::User => {
                wire_messages.push(json!({
                    "role": "user",
                    "content": msg.content,
                }));
            }
            Role::Assistant => {
                if msg.tool_calls.is_empty() {
                    wire_messages.push(json!({
                        "role": "assistant",
                        "content": msg.content,
                    }));
                } else {
                    let mut content: Vec<Value> = Vec::new();
                    if !msg.content.is_empty() {
                        content.push(json!({"type": "text", "text": msg.content}));
                    }
                    for tc in &msg.tool_calls {
                        content.push(json!({
                            "type": "tool_use",
                            "id": tc.id,
                            "name": tc.name,
                            "input": tc.arguments,
                        }));
                    }
                    wire_messages.push(json!({"role": "assistant", "content": content}));
                }
            }
            Role::Tool => {
                wire_messages.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": msg.tool_call_id,
                        "content": msg.content,
                    }],
                }));
            }
        }
    }

    if !request.images.is_empty() {
        attach_images_anthropic(&mut wire_messages, &request.images);
    }

    let mut body = json!({
        "model": request.model,
        "max_tokens": request.max_tokens.unwrap_or(4096),
        "messages": wire_messages,
    });

    if let Some(system) = system {
        body["system"] = json!(system);
    }
    if let Some(temp) = request.temperature {
        body["temperature"] = json!(temp);
    }
    if !request.tools.is_empty() {
        body["tools"] = tools_to_anthropic(&request.tools);
    }

    body
}

/// Rewrite the final user message into a content array carrying the images.
fn attach_images_anthropic(wire_messages: &mut [Value], images: &[crate::query::MediaRef]) {
    let Some(last_user) = wire_messages
        .iter_mut()
        .rev()
        .find(|m| m["role"] == "user" && m["content"].is_string())
    else {
        return;
    };

    let text = last_user["content"].as_str().unwrap_or_default().to_owned();
    let mut content: Vec<Value> = images
        .iter()
        .map(|img| {
            json!({
                "type": "image",
                "source": {"type": "url", "url": img.location},
            })
        })
        .collect();
    content.push(json!({"type": "text", "text": text}));
    last_user["content"] = json!(content);
}

/// Convert tool definitions into the Anthropic API format.
fn tools_to_anthropic(tools: &[ToolDefinition]) -> Value {
    let tool_values: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "input_schema": t.input_schema,
            })
        })
        .collect();
    json!(tool_values)
}

/// Parse a non-streaming Anthropic Messages API response.
fn parse_anthropic_response(v: &Value) -> Result<TransportReply, TransportError> {
    let content = v["content"]
        .as_array()
        .ok_or_else(|| TransportError::Malformed("missing `content` array in response".into()))?;

    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in content {
        match block["type"].as_str() {
            Some("text") => {
                if let Some(t) = block["text"].as_str() {
                    text_parts.push(t.to_owned());
                }
            }
            Some("tool_use") => {
                tool_calls.push(ToolCall {
                    id: block["id"].as_str().unwrap_or_default().to_owned(),
                    name: block["name"].as_str().unwrap_or_default().to_owned(),
                    arguments: block["input"].clone(),
                });
            }
            _ => {}
        }
    }

    let tokens = TokenCounts {
        input_tokens: v["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
        output_tokens: v["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
    };

    let reply = if tool_calls.is_empty() {
        ModelReply::Text(text_parts.join(""))
    } else {
        ModelReply::ToolCalls(tool_calls)
    };

    Ok(TransportReply { reply, tokens })
}

// ===========================================================================
// OpenAI wire format
// ===========================================================================

/// Build the JSON body for the OpenAI Chat Completions API.
fn build_openai_body(request: &ChatRequest) -> Value {
    let mut wire_messages: Vec<Value> = Vec::with_capacity(request.messages.len());

    for msg in &request.messages {
        match msg.role {
            Role::System => {
                wire_messages.push(json!({"role": "system", "content": msg.content}));
            }
            Role::User => {
                wire_messages.push(json!({"role": "user", "content": msg.content}));
            }
            Role::Assistant => {
                if msg.tool_calls.is_empty() {
                    wire_messages.push(json!({"role": "assistant", "content": msg.content}));
                } else {
                    let tool_calls: Vec<Value> = msg
                        .tool_calls
                        .iter()
                        .map(|tc| {
                            json!({
                                "id": tc.id,
                                "type": "function",
                                "function": {
                                    "name": tc.name,
                                    "arguments": tc.arguments.to_string(),
                                }
                            })
                        })
                        .collect();

                    let mut m = json!({"role": "assistant", "tool_calls": tool_calls});
                    if !msg.content.is_empty() {
                        m["content"] = json!(msg.content);
                    }
                    wire_messages.push(m);
                }
            }
            Role::Tool => {
                wire_messages.push(json!({
                    "role": "tool",
                    "tool_call_id": msg.tool_call_id,
                    "content": msg.content,
                }));
            }
        }
    }

    if !request.images.is_empty() {
        attach_images_openai(&mut wire_messages, &request.images);
    }

    let mut body = json!({
        "model": request.model,
        "max_tokens": request.max_tokens.unwrap_or(4096),
        "messages": wire_messages,
    });

    if let Some(temp) = request.temperature {
        body["temperature"] = json!(temp);
    }
    if !request.tools.is_empty() {
        body["tools"] = tools_to_openai(&request.tools);
    }

    body
}

/// Rewrite the final user message into content parts carrying the images.
fn attach_images_openai(wire_messages: &mut [Value], images: &[crate::query::MediaRef]) {
    let Some(last_user) = wire_messages
        .iter_mut()
        .rev()
        .find(|m| m["role"] == "user" && m["content"].is_string())
    else {
        return;
    };

    let text = last_user["content"].as_str().unwrap_or_default().to_owned();
    let mut content: Vec<Value> = vec![json!({"type": "text", "text": text})];
    for img in images {
        content.push(json!({
            "type": "image_url",
            "image_url": {"url": img.location},
        }));
    }
    last_user["content"] = json!(content);
}

/// Convert tool definitions into the OpenAI Chat Completions API format.
fn tools_to_openai(tools: &[ToolDefinition]) -> Value {
    let tool_values: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.input_schema,
                }
            })
        })
        .collect();
    json!(tool_values)
}

/// Parse a non-streaming OpenAI Chat Completions API response.
fn parse_openai_response(v: &Value) -> Result<TransportReply, TransportError> {
    let message = &v["choices"][0]["message"];
    if message.is_null() {
        return Err(TransportError::Malformed(
            "missing `choices[0].message` in response".into(),
        ));
    }

    let tokens = TokenCounts {
        input_tokens: v["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        output_tokens: v["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
    };

    if let Some(tool_calls_arr) = message["tool_calls"].as_array()
        && !tool_calls_arr.is_empty()
    {
        let calls: Result<Vec<ToolCall>, TransportError> = tool_calls_arr
            .iter()
            .map(|tc| {
                let func = &tc["function"];
                let name = func["name"].as_str().unwrap_or_default().to_owned();
                let args_str = func["arguments"].as_str().unwrap_or("{}");
                let arguments: Value = serde_json::from_str(args_str).map_err(|e| {
                    TransportError::Malformed(format!(
                        "invalid JSON in tool call `{name}` arguments: {e}"
                    ))
                })?;

                Ok(ToolCall {
                    id: tc["id"].as_str().unwrap_or_default().to_owned(),
                    name,
                    arguments,
                })
            })
            .collect();

        return Ok(TransportReply {
            reply: ModelReply::ToolCalls(calls?),
            tokens,
        });
    }

    let content = message["content"].as_str().unwrap_or_default();
    Ok(TransportReply {
        reply: ModelReply::Text(content.to_owned()),
        tokens,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
