//! LLM provider interface
//!
//! Conversation message model shared by the session store and the agent,
//! plus the [`Provider`] trait and an OpenAI-compatible client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use thiserror::Error;

pub mod openrouter;

pub use openrouter::OpenRouterProvider;

/// Provider errors
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API error: {0}")]
    Api(String),

    #[error("no API key configured")]
    NoApiKey,

    #[error("invalid response from provider")]
    InvalidResponse,

    #[error("rate limited")]
    RateLimited,
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Tool call arguments as delivered by the model
///
/// Most APIs send a JSON-encoded string; some send an object directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolArguments {
    Raw(String),
    Structured(Value),
}

impl ToolArguments {
    /// Arguments as the JSON string the wire format expects
    pub fn to_wire_string(&self) -> String {
        match self {
            ToolArguments::Raw(s) => s.clone(),
            ToolArguments::Structured(v) => v.to_string(),
        }
    }
}

impl From<Value> for ToolArguments {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => ToolArguments::Raw(s),
            other => ToolArguments::Structured(other),
        }
    }
}

impl From<&str> for ToolArguments {
    fn from(value: &str) -> Self {
        ToolArguments::Raw(value.to_string())
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: ToolArguments,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<ToolArguments>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// One entry of a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<ToolCall>>,
    },
    Tool {
        tool_call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        content: String,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: Some(content.into()),
            tool_calls: None,
        }
    }

    /// Assistant turn; an empty call list is stored as `None`
    pub fn assistant_with_tools(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Message::Assistant {
            content,
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
        }
    }

    pub fn tool(
        call_id: impl Into<String>,
        name: impl Into<String>,
        result: impl Into<String>,
    ) -> Self {
        Message::Tool {
            tool_call_id: call_id.into(),
            name: Some(name.into()),
            content: result.into(),
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Message::System { .. } => "system",
            Message::User { .. } => "user",
            Message::Assistant { .. } => "assistant",
            Message::Tool { .. } => "tool",
        }
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            Message::System { content } | Message::User { content } => Some(content),
            Message::Assistant { content, .. } => content.as_deref(),
            Message::Tool { content, .. } => Some(content),
        }
    }

    /// Calls carried by an assistant message
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Message::Assistant {
                tool_calls: Some(calls),
                ..
            } => calls,
            _ => &[],
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Message::System { .. })
    }

    pub fn is_tool(&self) -> bool {
        matches!(self, Message::Tool { .. })
    }
}

/// Tool schema offered to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Token accounting
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Model reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub finish_reason: String,
    #[serde(default)]
    pub usage: Usage,
}

impl ChatResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Non-empty text content, if any
    pub fn text_content(&self) -> Option<&str> {
        self.content.as_deref().filter(|c| !c.trim().is_empty())
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
            finish_reason: "stop".to_string(),
            usage: Usage::default(),
        }
    }

    pub fn with_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content,
            tool_calls,
            finish_reason: "tool_calls".to_string(),
            usage: Usage::default(),
        }
    }

    pub fn empty() -> Self {
        Self {
            content: None,
            tool_calls: Vec::new(),
            finish_reason: "stop".to_string(),
            usage: Usage::default(),
        }
    }
}

/// Request parameters
#[derive(Debug, Clone)]
pub struct ChatParams {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub tool_choice: ToolChoice,
}

impl Default for ChatParams {
    fn default() -> Self {
        Self {
            model: String::new(),
            messages: Vec::new(),
            tools: Vec::new(),
            max_tokens: 4096,
            temperature: 0.7,
            tool_choice: ToolChoice::Auto,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ToolChoice {
    Auto,
    Required(String),
    None,
}

/// A chat-completion backend
#[async_trait]
pub trait Provider: Send + Sync {
    async fn chat(&self, params: ChatParams) -> Result<ChatResponse>;
    fn default_model(&self) -> String;
    fn is_configured(&self) -> bool;
}

/// Build a JSON schema object from `(name, description, required)` string fields
pub fn object_schema(properties: Vec<(&str, &str, bool)>) -> Value {
    let mut props = serde_json::Map::new();
    let mut required = Vec::new();

    for (name, description, is_required) in properties {
        props.insert(
            name.to_string(),
            serde_json::json!({
                "type": "string",
                "description": description
            }),
        );
        if is_required {
            required.push(name.to_string());
        }
    }

    serde_json::json!({
        "type": "object",
        "properties": props,
        "required": required
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ========== Message Tests ==========

    #[test]
    fn test_message_roles() {
        assert_eq!(Message::system("s").role(), "system");
        assert_eq!(Message::user("u").role(), "user");
        assert_eq!(Message::assistant("a").role(), "assistant");
        assert_eq!(Message::tool("c1", "t", "r").role(), "tool");
    }

    #[test]
    fn test_assistant_with_empty_calls_stores_none() {
        let msg = Message::assistant_with_tools(Some("hi".to_string()), vec![]);
        match &msg {
            Message::Assistant { tool_calls, .. } => assert!(tool_calls.is_none()),
            _ => panic!("expected assistant"),
        }
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("tool_calls"));
    }

    #[test]
    fn test_message_serialization_tagged_by_role() {
        let json = serde_json::to_value(Message::user("Hello")).unwrap();
        assert_eq!(json, json!({"role": "user", "content": "Hello"}));

        let json = serde_json::to_value(Message::tool("call_1", "list_dir", "a\nb")).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_call_id"], "call_1");
        assert_eq!(json["name"], "list_dir");
    }

    #[test]
    fn test_message_deserialization() {
        let msg: Message = serde_json::from_str(
            r#"{"role":"assistant","tool_calls":[{"id":"c1","name":"exec","arguments":"{\"command\":\"ls\"}"}]}"#,
        )
        .unwrap();
        assert_eq!(msg.tool_calls().len(), 1);
        assert_eq!(
            msg.tool_calls()[0].arguments,
            ToolArguments::Raw("{\"command\":\"ls\"}".to_string())
        );
        assert!(msg.content().is_none());
    }

    #[test]
    fn test_tool_calls_on_non_assistant_is_empty() {
        assert!(Message::user("x").tool_calls().is_empty());
        assert!(Message::assistant("x").tool_calls().is_empty());
    }

    // ========== ToolArguments Tests ==========

    #[test]
    fn test_tool_arguments_from_value() {
        assert_eq!(
            ToolArguments::from(json!("{}")),
            ToolArguments::Raw("{}".to_string())
        );
        assert_eq!(
            ToolArguments::from(json!({"a": 1})),
            ToolArguments::Structured(json!({"a": 1}))
        );
    }

    #[test]
    fn test_tool_arguments_wire_string() {
        assert_eq!(ToolArguments::Raw(" {} ".into()).to_wire_string(), " {} ");
        assert_eq!(
            ToolArguments::Structured(json!({"path": "."})).to_wire_string(),
            r#"{"path":"."}"#
        );
    }

    // ========== ChatResponse Tests ==========

    #[test]
    fn test_chat_response_text_content_ignores_blank() {
        assert_eq!(ChatResponse::text("4").text_content(), Some("4"));
        assert!(ChatResponse::text("   ").text_content().is_none());
        assert!(ChatResponse::empty().text_content().is_none());
    }

    #[test]
    fn test_chat_response_has_tool_calls() {
        assert!(!ChatResponse::text("Hello").has_tool_calls());
        let response =
            ChatResponse::with_tool_calls(None, vec![ToolCall::new("c", "t", json!({}))]);
        assert!(response.has_tool_calls());
        assert_eq!(response.finish_reason, "tool_calls");
    }

    // ========== Misc ==========

    #[test]
    fn test_chat_params_default() {
        let params = ChatParams::default();
        assert!(params.messages.is_empty());
        assert_eq!(params.max_tokens, 4096);
        assert!(matches!(params.tool_choice, ToolChoice::Auto));
    }

    #[test]
    fn test_object_schema_required_fields() {
        let schema = object_schema(vec![
            ("path", "File path", true),
            ("encoding", "Optional encoding", false),
        ]);
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["path"]["type"], "string");
        assert_eq!(schema["required"], json!(["path"]));
    }

    #[test]
    fn test_provider_error_display() {
        assert_eq!(ProviderError::NoApiKey.to_string(), "no API key configured");
        assert_eq!(
            ProviderError::Api("boom".to_string()).to_string(),
            "API error: boom"
        );
    }
}
