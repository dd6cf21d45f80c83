//! OpenRouter / OpenAI-compatible chat completions client

use crate::*;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, trace};

/// Client for any `/chat/completions` endpoint speaking the OpenAI dialect
pub struct OpenRouterProvider {
    client: Client,
    api_key: String,
    api_base: String,
    default_model: String,
}

impl OpenRouterProvider {
    pub fn new(
        api_key: impl Into<String>,
        api_base: Option<String>,
        default_model: Option<String>,
    ) -> Self {
        let api_key = api_key.into();
        let is_openrouter = api_key.starts_with("sk-or-")
            || api_base
                .as_ref()
                .map(|b| b.contains("openrouter"))
                .unwrap_or(false);

        let api_base = api_base
            .unwrap_or_else(|| {
                if is_openrouter {
                    "https://openrouter.ai/api/v1".to_string()
                } else {
                    "https://api.openai.com/v1".to_string()
                }
            })
            .trim_end_matches('/')
            .to_string();

        let default_model = default_model.unwrap_or_else(|| {
            if is_openrouter {
                "anthropic/claude-sonnet-4".to_string()
            } else {
                "gpt-4o".to_string()
            }
        });

        Self {
            client: Client::new(),
            api_key,
            api_base,
            default_model,
        }
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn wire_message(message: &Message) -> serde_json::Value {
        match message {
            Message::System { content } => json!({"role": "system", "content": content}),
            Message::User { content } => json!({"role": "user", "content": content}),
            Message::Assistant {
                content,
                tool_calls,
            } => {
                let mut obj = json!({"role": "assistant", "content": content});
                if let Some(calls) = tool_calls {
                    let calls: Vec<serde_json::Value> = calls
                        .iter()
                        .map(|c| {
                            json!({
                                "id": c.id,
                                "type": "function",
                                "function": {
                                    "name": c.name,
                                    "arguments": c.arguments.to_wire_string(),
                                }
                            })
                        })
                        .collect();
                    obj["tool_calls"] = json!(calls);
                } else if content.is_none() {
                    obj["content"] = json!("");
                }
                obj
            }
            Message::Tool {
                tool_call_id,
                name,
                content,
            } => {
                let mut obj =
                    json!({"role": "tool", "tool_call_id": tool_call_id, "content": content});
                if let Some(name) = name {
                    obj["name"] = json!(name);
                }
                obj
            }
        }
    }

    fn build_request(&self, params: &ChatParams) -> serde_json::Value {
        let model = if params.model.is_empty() {
            self.default_model.clone()
        } else {
            params.model.clone()
        };

        let messages: Vec<serde_json::Value> =
            params.messages.iter().map(Self::wire_message).collect();

        let mut body = json!({
            "model": model,
            "messages": messages,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
        });

        if !params.tools.is_empty() {
            let tools: Vec<serde_json::Value> = params
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": &t.name,
                            "description": &t.description,
                            "parameters": &t.parameters
                        }
                    })
                })
                .collect();

            body["tools"] = json!(tools);
            body["tool_choice"] = match &params.tool_choice {
                ToolChoice::Auto => json!("auto"),
                ToolChoice::Required(name) => {
                    json!({"type": "function", "function": {"name": name}})
                }
                ToolChoice::None => json!("none"),
            };
        }

        body
    }

    fn parse_response(&self, json: serde_json::Value) -> Result<ChatResponse> {
        let choice = json["choices"]
            .get(0)
            .ok_or(ProviderError::InvalidResponse)?;
        let message = &choice["message"];
        let content = message["content"].as_str().map(|s| s.to_string());
        let finish_reason = choice["finish_reason"]
            .as_str()
            .unwrap_or("stop")
            .to_string();

        // Arguments are kept as delivered; the executor parses them
        let mut tool_calls = Vec::new();
        if let Some(calls) = message["tool_calls"].as_array() {
            for call in calls {
                let function = &call["function"];
                let arguments = match &function["arguments"] {
                    serde_json::Value::Null => ToolArguments::Raw(String::new()),
                    other => ToolArguments::from(other.clone()),
                };

                tool_calls.push(ToolCall {
                    id: call["id"].as_str().unwrap_or("").to_string(),
                    name: function["name"].as_str().unwrap_or("").to_string(),
                    arguments,
                });
            }
        }

        let usage = if let Some(usage) = json["usage"].as_object() {
            let field = |k: &str| usage.get(k).and_then(|v| v.as_u64()).unwrap_or(0) as u32;
            Usage {
                prompt_tokens: field("prompt_tokens"),
                completion_tokens: field("completion_tokens"),
                total_tokens: field("total_tokens"),
            }
        } else {
            Usage::default()
        };

        Ok(ChatResponse {
            content,
            tool_calls,
            finish_reason,
            usage,
        })
    }
}

#[async_trait::async_trait]
impl Provider for OpenRouterProvider {
    async fn chat(&self, params: ChatParams) -> Result<ChatResponse> {
        if self.api_key.is_empty() && !self.api_base.starts_with("http://localhost") {
            return Err(ProviderError::NoApiKey);
        }
        trace!("POST {}/chat/completions", self.api_base);

        let url = format!("{}/chat/completions", self.api_base);
        let body = self.build_request(&params);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited);
        }
        let json: serde_json::Value = response.json().await?;

        if !status.is_success() {
            let error = json["error"]["message"]
                .as_str()
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("HTTP {}", status));
            return Err(ProviderError::Api(error));
        }

        debug!(
            "Provider returned {} tool call(s)",
            json["choices"][0]["message"]["tool_calls"]
                .as_array()
                .map(|v| v.len())
                .unwrap_or(0)
        );

        self.parse_response(json)
    }

    fn default_model(&self) -> String {
        self.default_model.clone()
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}
