use super::logging::{debug_payload_enabled, emit_debug_payload};
use super::stream::forward_text_deltas;
use super::{GenerateRequest, Generation, ModelProvider};
use crate::config::Config;
use crate::flow::{ProviderError, Schema};
use crate::types::{
    ApiMessage, ChatCompletionResponse, ContentBlock, MessagesResponse,
};
use crate::util::{is_local_endpoint_url, strip_code_fence};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

const SYSTEM_PROMPT: &str = "You are the assistant inside a code workbench.\n\
Answer precisely and keep code in the language the user is working in.\n\
When a tool named emit_output is offered, call it exactly once with the complete answer.";

/// Name of the forced tool call used to obtain structured output.
const OUTPUT_TOOL_NAME: &str = "emit_output";
const OUTPUT_TOOL_DESCRIPTION: &str = "Return the final answer in the required structure.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApiProtocol {
    AnthropicMessages,
    OpenAiChatCompletions,
}

/// HTTP model provider speaking either the Anthropic Messages or the OpenAI
/// Chat Completions protocol.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    api_key: Option<String>,
    model: String,
    api_url: String,
    anthropic_version: String,
    api_protocol: ApiProtocol,
    max_tokens: u32,
}

impl ApiClient {
    pub fn new(config: &Config) -> Self {
        let api_protocol = config
            .api_protocol
            .as_deref()
            .and_then(parse_protocol)
            .unwrap_or_else(|| infer_api_protocol(&config.api_url));

        Self {
            http: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            api_url: config.api_url.clone(),
            anthropic_version: config.anthropic_version.clone(),
            api_protocol,
            max_tokens: resolve_max_tokens(config.max_tokens, &config.api_url),
        }
    }

    fn request_url(&self) -> String {
        match self.api_protocol {
            ApiProtocol::AnthropicMessages => self.api_url.clone(),
            ApiProtocol::OpenAiChatCompletions => {
                adapt_to_openai_chat_completions_url(&self.api_url)
            }
        }
    }

    fn build_payload(&self, request: &GenerateRequest, stream: bool) -> Value {
        let messages = api_messages(request);
        match self.api_protocol {
            ApiProtocol::AnthropicMessages => {
                let mut payload = json!({
                    "model": self.model,
                    "max_tokens": self.max_tokens,
                    "system": SYSTEM_PROMPT,
                    "messages": messages,
                });
                if stream {
                    payload["stream"] = json!(true);
                }
                if let Some(schema) = &request.output_schema {
                    payload["tools"] = json!([output_tool(schema)]);
                    payload["tool_choice"] = json!({ "type": "tool", "name": OUTPUT_TOOL_NAME });
                }
                payload
            }
            ApiProtocol::OpenAiChatCompletions => {
                let mut payload = json!({
                    "model": self.model,
                    "max_tokens": self.max_tokens,
                    "messages": openai_messages(&messages, SYSTEM_PROMPT),
                });
                if stream {
                    payload["stream"] = json!(true);
                }
                if let Some(schema) = &request.output_schema {
                    payload["tools"] = json!([output_tool_openai(schema)]);
                    payload["tool_choice"] = json!({
                        "type": "function",
                        "function": { "name": OUTPUT_TOOL_NAME }
                    });
                }
                payload
            }
        }
    }

    async fn send(&self, payload: &Value) -> Result<reqwest::Response, ProviderError> {
        let request_url = self.request_url();
        let mut request = self
            .http
            .post(&request_url)
            .header("content-type", "application/json")
            .json(payload);

        if debug_payload_enabled() {
            emit_debug_payload(&request_url, payload);
        }

        match self.api_protocol {
            ApiProtocol::AnthropicMessages => {
                if let Some(api_key) = &self.api_key {
                    request = request.header("x-api-key", api_key);
                }
                if !self.anthropic_version.trim().is_empty() {
                    request = request.header("anthropic-version", &self.anthropic_version);
                }
            }
            ApiProtocol::OpenAiChatCompletions => {
                if let Some(api_key) = &self.api_key {
                    request = request.header("authorization", format!("Bearer {api_key}"));
                }
            }
        }

        tracing::debug!(url = %request_url, model = %self.model, "sending model request");
        let response = request
            .send()
            .await
            .map_err(|error| map_api_request_error(error, &request_url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                url: request_url,
                status: status.as_u16(),
                message: summarize_error_body(&body),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ModelProvider for ApiClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<Generation, ProviderError> {
        let payload = self.build_payload(request, false);
        let response = self.send(&payload).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|error| ProviderError::MalformedResponse(error.to_string()))?;

        match self.api_protocol {
            ApiProtocol::AnthropicMessages => parse_messages_response(body),
            ApiProtocol::OpenAiChatCompletions => parse_chat_completion_response(body),
        }
    }

    async fn stream_text(
        &self,
        request: &GenerateRequest,
        deltas: &mpsc::UnboundedSender<String>,
    ) -> Result<String, ProviderError> {
        let payload = self.build_payload(request, true);
        let request_url = self.request_url();
        let response = self.send(&payload).await?;

        forward_text_deltas(response.bytes_stream(), deltas, |error| {
            map_api_request_error(error, &request_url)
        })
        .await
    }
}

fn api_messages(request: &GenerateRequest) -> Vec<ApiMessage> {
    let mut messages: Vec<ApiMessage> = request
        .history
        .iter()
        .map(|message| ApiMessage::text(message.role.wire_role(), message.content.clone()))
        .collect();
    messages.push(ApiMessage::text("user", request.prompt.clone()));
    messages
}

fn output_tool(schema: &Schema) -> Value {
    json!({
        "name": OUTPUT_TOOL_NAME,
        "description": OUTPUT_TOOL_DESCRIPTION,
        "input_schema": schema.to_json_schema(),
    })
}

fn output_tool_openai(schema: &Schema) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": OUTPUT_TOOL_NAME,
            "description": OUTPUT_TOOL_DESCRIPTION,
            "parameters": schema.to_json_schema(),
        }
    })
}

fn parse_messages_response(body: Value) -> Result<Generation, ProviderError> {
    let response: MessagesResponse = serde_json::from_value(body)
        .map_err(|error| ProviderError::MalformedResponse(error.to_string()))?;

    let mut text = String::new();
    for block in response.content {
        match block {
            ContentBlock::ToolUse { name, input, .. } if name == OUTPUT_TOOL_NAME => {
                return Ok(Generation::Structured(input));
            }
            ContentBlock::Text { text: piece } => text.push_str(&piece),
            _ => {}
        }
    }

    if text.trim().is_empty() {
        return Err(ProviderError::EmptyResponse);
    }
    Ok(Generation::Text(text))
}

fn parse_chat_completion_response(body: Value) -> Result<Generation, ProviderError> {
    let response: ChatCompletionResponse = serde_json::from_value(body)
        .map_err(|error| ProviderError::MalformedResponse(error.to_string()))?;
    let Some(choice) = response.choices.into_iter().next() else {
        return Err(ProviderError::EmptyResponse);
    };

    if let Some(call) = choice
        .message
        .tool_calls
        .into_iter()
        .find(|call| call.function.name == OUTPUT_TOOL_NAME)
    {
        let arguments = strip_code_fence(&call.function.arguments);
        let value: Value = serde_json::from_str(arguments).map_err(|error| {
            ProviderError::MalformedResponse(format!("tool arguments are not JSON: {error}"))
        })?;
        return Ok(Generation::Structured(value));
    }

    match choice.message.content {
        Some(text) if !text.trim().is_empty() => Ok(Generation::Text(text)),
        _ => Err(ProviderError::EmptyResponse),
    }
}

fn map_api_request_error(error: reqwest::Error, request_url: &str) -> ProviderError {
    if error.is_connect() && is_local_endpoint_url(request_url) {
        return ProviderError::Unreachable {
            url: request_url.to_string(),
            message: format!(
                "{error}. Start your local server or update CODEBENCH_API_URL."
            ),
        };
    }
    if error.is_connect() {
        return ProviderError::Unreachable {
            url: request_url.to_string(),
            message: error.to_string(),
        };
    }
    if let Some(status) = error.status() {
        return ProviderError::Status {
            url: request_url.to_string(),
            status: status.as_u16(),
            message: error.to_string(),
        };
    }
    ProviderError::Transport {
        url: request_url.to_string(),
        message: error.to_string(),
    }
}

fn summarize_error_body(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|value| value.pointer("/error/message"))
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| body.trim().to_string());
    if message.chars().count() > 300 {
        let truncated: String = message.chars().take(300).collect();
        format!("{truncated}…")
    } else {
        message
    }
}

fn resolve_max_tokens(configured: Option<u32>, api_url: &str) -> u32 {
    if let Some(value) = configured {
        return value.clamp(128, 8192);
    }

    if is_local_endpoint_url(api_url) {
        1024
    } else {
        4096
    }
}

fn parse_protocol(value: &str) -> Option<ApiProtocol> {
    match value.trim().to_ascii_lowercase().as_str() {
        "anthropic" | "messages" => Some(ApiProtocol::AnthropicMessages),
        "openai" | "chat" | "chat_completions" => Some(ApiProtocol::OpenAiChatCompletions),
        _ => None,
    }
}

fn infer_api_protocol(api_url: &str) -> ApiProtocol {
    let normalized = api_url.trim().to_ascii_lowercase();
    if normalized.contains("/chat/completions") || normalized.ends_with("/v1") {
        ApiProtocol::OpenAiChatCompletions
    } else {
        ApiProtocol::AnthropicMessages
    }
}

fn adapt_to_openai_chat_completions_url(api_url: &str) -> String {
    let normalized = api_url.trim_end_matches('/');
    if normalized.ends_with("/chat/completions") {
        return normalized.to_string();
    }
    if let Some(prefix) = normalized.strip_suffix("/messages") {
        return format!("{prefix}/chat/completions");
    }
    if normalized.ends_with("/v1") {
        return format!("{normalized}/chat/completions");
    }
    normalized.to_string()
}

fn openai_messages(messages: &[ApiMessage], system_prompt: &str) -> Vec<Value> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    out.push(json!({
        "role": "system",
        "content": system_prompt
    }));
    out.extend(
        messages
            .iter()
            .map(|message| serde_json::to_value(message).unwrap_or(Value::Null)),
    );
    out
}
