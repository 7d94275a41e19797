use super::{ChatModel, ChatRequest, ChatResponse, LlmError, ToolCall};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
}

#[derive(Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OpenAiTool>,
}

#[derive(Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    // Some compatible providers send an explicit null.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct OpenAiToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: OpenAiFunctionCall,
}

#[derive(Serialize, Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Serialize)]
struct OpenAiTool {
    #[serde(rename = "type")]
    kind: String,
    function: OpenAiFunctionDef,
}

#[derive(Serialize)]
struct OpenAiFunctionDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

fn function_kind() -> String {
    "function".to_string()
}

fn build_request(request: &ChatRequest) -> OpenAiRequest {
    let messages = request
        .messages
        .iter()
        .map(|m| OpenAiMessage {
            role: m.role.clone(),
            // Assistant turns that only carry tool calls are sent with a null content.
            content: if m.content.is_empty() && !m.tool_calls.is_empty() {
                None
            } else {
                Some(m.content.clone())
            },
            tool_calls: (!m.tool_calls.is_empty()).then(|| {
                m.tool_calls
                    .iter()
                    .map(|c| OpenAiToolCall {
                        id: c.id.clone(),
                        kind: function_kind(),
                        function: OpenAiFunctionCall {
                            name: c.name.clone(),
                            arguments: c.arguments.clone(),
                        },
                    })
                    .collect()
            }),
            tool_call_id: m.tool_call_id.clone(),
        })
        .collect();

    let tools = request
        .tools
        .iter()
        .map(|t| OpenAiTool {
            kind: function_kind(),
            function: OpenAiFunctionDef {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            },
        })
        .collect();

    OpenAiRequest {
        model: request.model.clone(),
        messages,
        stream: false,
        temperature: request.temperature,
        tools,
    }
}

fn parse_response(data: OpenAiResponse, requested_model: &str) -> Result<ChatResponse, LlmError> {
    let choice = data
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::Parse("response contained no choices".into()))?;

    Ok(ChatResponse {
        content: choice.message.content.unwrap_or_default(),
        model: data.model.unwrap_or_else(|| requested_model.to_string()),
        tool_calls: choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|c| ToolCall {
                id: c.id,
                name: c.function.name,
                arguments: c.function.arguments,
            })
            .collect(),
    })
}

/// Chat-completions client for any OpenAI-compatible endpoint (Groq, OpenAI, Ollama).
#[derive(Debug, Clone)]
pub struct OpenAiChatClient {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiChatClient {
    pub fn new(config: OpenAiConfig, client: Client) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl ChatModel for OpenAiChatClient {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        chat(&self.client, &self.config, request).await
    }
}

pub async fn chat(
    client: &Client,
    config: &OpenAiConfig,
    request: &ChatRequest,
) -> Result<ChatResponse, LlmError> {
    let body = build_request(request);

    let mut req = client
        .post(format!("{}/chat/completions", config.base_url))
        .header("Content-Type", "application/json")
        .json(&body);

    if !config.api_key.is_empty() {
        req = req.header("Authorization", format!("Bearer {}", config.api_key));
    }

    let resp = req.send().await?;

    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        log::warn!("chat completion failed with {}: {}", status, text);
        return Err(LlmError::Api {
            status,
            message: text,
        });
    }

    let data: OpenAiResponse = resp.json().await?;
    parse_response(data, &request.model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatMessage, ToolDefinition};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_request_shape_with_tools() {
        let request = ChatRequest {
            messages: vec![
                ChatMessage::system("be brief"),
                ChatMessage::assistant_tool_calls(
                    "",
                    vec![ToolCall {
                        id: "call_1".into(),
                        name: "calculator".into(),
                        arguments: r#"{"expression":"1+1"}"#.into(),
                    }],
                ),
                ChatMessage::tool("call_1", "2"),
            ],
            model: "llama3-8b-8192".into(),
            temperature: Some(0.2),
            tools: vec![ToolDefinition {
                name: "calculator".into(),
                description: "math".into(),
                parameters: json!({"type": "object"}),
            }],
        };

        let value = serde_json::to_value(build_request(&request)).unwrap();
        assert_eq!(value["stream"], json!(false));
        assert_eq!(value["messages"][0], json!({"role": "system", "content": "be brief"}));
        assert_eq!(value["messages"][1]["content"], json!(null));
        assert_eq!(value["messages"][1]["tool_calls"][0]["type"], json!("function"));
        assert_eq!(value["messages"][2]["tool_call_id"], json!("call_1"));
        assert_eq!(value["tools"][0]["function"]["name"], json!("calculator"));
    }

    #[test]
    fn test_plain_request_omits_tools() {
        let request = ChatRequest {
            messages: vec![ChatMessage::user("hi")],
            model: "m".into(),
            temperature: None,
            tools: vec![],
        };
        let value = serde_json::to_value(build_request(&request)).unwrap();
        assert!(value.get("tools").is_none());
        assert!(value.get("temperature").is_none());
    }

    #[test]
    fn test_parse_tool_call_response() {
        let data: OpenAiResponse = serde_json::from_value(json!({
            "model": "llama3-8b-8192",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "current_time", "arguments": "{}"}
                    }]
                }
            }]
        }))
        .unwrap();

        let response = parse_response(data, "fallback").unwrap();
        assert_eq!(response.content, "");
        assert_eq!(response.model, "llama3-8b-8192");
        assert_eq!(response.tool_calls[0].name, "current_time");
    }

    #[test]
    fn test_parse_null_tool_calls() {
        let data: OpenAiResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {"role": "assistant", "content": "Hello", "tool_calls": null}
            }]
        }))
        .unwrap();

        let response = parse_response(data, "fallback").unwrap();
        assert_eq!(response.content, "Hello");
        assert_eq!(response.model, "fallback");
        assert!(response.tool_calls.is_empty());
    }

    #[test]
    fn test_parse_empty_choices_is_an_error() {
        let data: OpenAiResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(matches!(parse_response(data, "m"), Err(LlmError::Parse(_))));
    }
}
