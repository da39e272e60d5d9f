//! Chat model seam and the OpenRouter (OpenAI-compatible) implementation.

use async_trait::async_trait;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::content::{Content, FunctionCall, ModelPart, MODEL_ROLE};
use crate::error::AgentError;
use crate::tools::ToolDeclaration;

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "anthropic/claude-3.5-sonnet";

/// One model call: instruction, conversation so far, and available tools.
#[derive(Debug, Clone)]
pub struct ChatRequest<'a> {
    pub system_instruction: String,
    pub contents: &'a [Content],
    pub tools: &'a [ToolDeclaration],
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_id(&self) -> &str;

    /// Produce the next model turn. Tool calls appear as function-call parts.
    async fn generate(&self, request: &ChatRequest<'_>) -> Result<Content, AgentError>;
}

pub struct OpenRouterModel {
    model: String,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenRouterModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterModel")
            .field("model", &self.model)
            .field("api_key", &"[redacted]")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl OpenRouterModel {
    pub fn new(
        model: impl Into<String>,
        api_key: impl Into<String>,
        base_url: Option<String>,
    ) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .pool_max_idle_per_host(10)
            .build()?;
        Ok(Self {
            model: model.into(),
            api_key: api_key.into(),
            base_url: base_url
                .unwrap_or_else(|| OPENROUTER_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            client,
        })
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("X-Title", HeaderValue::from_static("github-agent"));
        if let Ok(val) = HeaderValue::from_str(&format!("Bearer {}", self.api_key)) {
            headers.insert(AUTHORIZATION, val);
        }
        headers
    }

    fn build_request_body(&self, request: &ChatRequest<'_>) -> Value {
        let mut messages = vec![json!({
            "role": "system",
            "content": request.system_instruction,
        })];
        for content in request.contents {
            messages.extend(content_to_openai(content));
        }

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
        });

        if !request.tools.is_empty() {
            let tool_defs: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tool_defs);
        }

        body
    }
}

#[async_trait]
impl ChatModel for OpenRouterModel {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &ChatRequest<'_>) -> Result<Content, AgentError> {
        let body = self.build_request_body(request);
        let url = format!("{}/chat/completions", self.base_url);

        debug!(model = %self.model, messages = request.contents.len(), "OpenRouter generate");

        let resp = self
            .client
            .post(&url)
            .headers(self.headers())
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status != 200 {
            let message = resp.text().await.unwrap_or_default();
            return Err(AgentError::LlmApi { status, message });
        }

        let data: ChatCompletionResponse = resp.json().await?;
        if let Some(err) = data.error {
            return Err(AgentError::LlmApi {
                status,
                message: err.to_string(),
            });
        }
        let choice = data
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::MalformedResponse("no choices in response".into()))?;

        debug!(finish_reason = ?choice.finish_reason, "OpenRouter response received");

        let mut parts = Vec::new();
        if let Some(text) = choice.message.content.filter(|t| !t.is_empty()) {
            parts.push(ModelPart::text(text));
        }
        for tc in choice.message.tool_calls.unwrap_or_default() {
            parts.push(ModelPart::function_call(FunctionCall {
                id: tc.id,
                name: tc.function.name,
                args: parse_arguments(tc.function.arguments),
            }));
        }

        Ok(Content::model(parts))
    }
}

fn parse_arguments(raw: String) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

/// Translate one content into zero or more chat-completions messages.
fn content_to_openai(content: &Content) -> Vec<Value> {
    if content.role == MODEL_ROLE {
        let text = content.text();
        let calls = content.function_calls();
        let mut msg = json!({
            "role": "assistant",
            "content": if text.is_empty() { Value::Null } else { Value::String(text) },
        });
        if !calls.is_empty() {
            let tc_json: Vec<Value> = calls
                .iter()
                .map(|tc| {
                    json!({
                        "id": tc.id,
                        "type": "function",
                        "function": {
                            "name": tc.name,
                            "arguments": tc.args.to_string(),
                        }
                    })
                })
                .collect();
            msg["tool_calls"] = Value::Array(tc_json);
        }
        return vec![msg];
    }

    let mut messages: Vec<Value> = content
        .function_responses()
        .into_iter()
        .map(|fr| {
            json!({
                "role": "tool",
                "tool_call_id": fr.id,
                "content": fr.response.to_string(),
            })
        })
        .collect();

    let parts: Vec<Value> = content.parts.iter().filter_map(user_part_to_openai).collect();
    match parts.as_slice() {
        [] => {}
        [single] if single["type"] == "text" => {
            messages.push(json!({ "role": "user", "content": single["text"] }));
        }
        _ => messages.push(json!({ "role": "user", "content": parts })),
    }
    messages
}

fn is_image(mime_type: Option<&str>) -> bool {
    mime_type.is_some_and(|m| m.starts_with("image/"))
}

fn user_part_to_openai(part: &ModelPart) -> Option<Value> {
    if let Some(text) = part.text.as_deref().filter(|t| !t.is_empty()) {
        return Some(json!({ "type": "text", "text": text }));
    }
    if let Some(file) = &part.file_data {
        if is_image(file.mime_type.as_deref()) {
            return Some(json!({ "type": "image_url", "image_url": { "url": file.file_uri } }));
        }
        let mime = file.mime_type.as_deref().unwrap_or("unknown type");
        return Some(json!({
            "type": "text",
            "text": format!("[Attached file: {} ({})]", file.file_uri, mime),
        }));
    }
    if let Some(blob) = &part.inline_data {
        let mime = blob.mime_type.as_deref().unwrap_or("application/octet-stream");
        if is_image(Some(mime)) {
            let encoded = base64::engine::general_purpose::STANDARD.encode(&blob.data);
            return Some(json!({
                "type": "image_url",
                "image_url": { "url": format!("data:{};base64,{}", mime, encoded) }
            }));
        }
        if mime.starts_with("text/") || mime == "application/json" {
            return Some(json!({
                "type": "text",
                "text": String::from_utf8_lossy(&blob.data),
            }));
        }
        return Some(json!({
            "type": "text",
            "text": format!("[Attached {} file, {} bytes]", mime, blob.data.len()),
        }));
    }
    None
}

// Chat completions response types (internal)

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ChatToolCall>>,
}

#[derive(Deserialize)]
struct ChatToolCall {
    id: String,
    function: ChatFunction,
}

#[derive(Deserialize)]
struct ChatFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::FunctionResponse;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn model(server: &MockServer) -> OpenRouterModel {
        OpenRouterModel::new(DEFAULT_MODEL, "sk-or-test", Some(server.uri())).unwrap()
    }

    #[tokio::test]
    async fn generate_returns_text_turn() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-or-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {"role": "assistant", "content": "You have 3 repos."},
                    "finish_reason": "stop"
                }]
            })))
            .mount(&server)
            .await;

        let contents = vec![Content::user(vec![ModelPart::text("show my repos")])];
        let tools = crate::tools::declarations();
        let request = ChatRequest {
            system_instruction: "be helpful".into(),
            contents: &contents,
            tools: &tools,
        };
        let turn = model(&server).generate(&request).await.unwrap();
        assert_eq!(turn.role, MODEL_ROLE);
        assert_eq!(turn.text(), "You have 3 repos.");
        assert!(turn.function_calls().is_empty());

        let requests = server.received_requests().await.unwrap_or_default();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["model"], DEFAULT_MODEL);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1], json!({"role": "user", "content": "show my repos"}));
        assert_eq!(body["tools"].as_array().unwrap().len(), 3);
        assert_eq!(body["tools"][0]["function"]["name"], "get_user_repositories");
    }

    #[tokio::test]
    async fn generate_parses_tool_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1",
                            "type": "function",
                            "function": {
                                "name": "get_recent_commits",
                                "arguments": "{\"repo_name\":\"octo/hello\"}"
                            }
                        }]
                    },
                    "finish_reason": "tool_calls"
                }]
            })))
            .mount(&server)
            .await;

        let contents = vec![Content::user(vec![ModelPart::text("commits?")])];
        let request = ChatRequest {
            system_instruction: String::new(),
            contents: &contents,
            tools: &[],
        };
        let turn = model(&server).generate(&request).await.unwrap();
        let calls = turn.function_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "get_recent_commits");
        assert_eq!(calls[0].args, json!({"repo_name": "octo/hello"}));
        assert!(turn.parts.iter().all(|p| p.text.is_none()));
    }

    #[tokio::test]
    async fn non_200_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
            .mount(&server)
            .await;

        let request = ChatRequest {
            system_instruction: String::new(),
            contents: &[],
            tools: &[],
        };
        let err = model(&server).generate(&request).await.unwrap_err();
        match err {
            AgentError::LlmApi { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "invalid key");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_choices_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let request = ChatRequest {
            system_instruction: String::new(),
            contents: &[],
            tools: &[],
        };
        let err = model(&server).generate(&request).await.unwrap_err();
        assert!(matches!(err, AgentError::MalformedResponse(_)));
    }

    #[test]
    fn tool_round_trip_messages() {
        let assistant = Content::model(vec![ModelPart::function_call(FunctionCall {
            id: "call_9".into(),
            name: "search_repositories".into(),
            args: json!({"query": "rust"}),
        })]);
        let msgs = content_to_openai(&assistant);
        assert_eq!(msgs[0]["role"], "assistant");
        assert_eq!(msgs[0]["content"], Value::Null);
        assert_eq!(msgs[0]["tool_calls"][0]["function"]["arguments"], "{\"query\":\"rust\"}");

        let results = Content::user(vec![ModelPart::function_response(FunctionResponse {
            id: "call_9".into(),
            name: "search_repositories".into(),
            response: json!({"status": "success", "data": [], "count": 0}),
        })]);
        let msgs = content_to_openai(&results);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0]["role"], "tool");
        assert_eq!(msgs[0]["tool_call_id"], "call_9");
    }

    #[test]
    fn user_attachments_become_content_parts() {
        let content = Content::user(vec![
            ModelPart::text("what is this?"),
            ModelPart::inline_data(vec![0x89, 0x50], Some("image/png".into())),
            ModelPart::file_data("https://example.com/report.pdf", Some("application/pdf".into())),
        ]);
        let msgs = content_to_openai(&content);
        let parts = msgs[0]["content"].as_array().unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1]["type"], "image_url");
        assert!(parts[1]["image_url"]["url"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));
        assert!(parts[2]["text"].as_str().unwrap().contains("report.pdf"));
    }

    #[test]
    fn blank_arguments_parse_as_empty_object() {
        assert_eq!(parse_arguments(String::new()), json!({}));
        assert_eq!(parse_arguments("not json".into()), json!("not json"));
    }
}
