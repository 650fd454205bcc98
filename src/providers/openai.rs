use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::chat::{ChatMessage, ChatProvider, ChatResponse, ToolCall};

/// Chat-completions adapter. Tool schemas are advertised on every call so
/// the model can drive the worker loop through function calls.
#[derive(Debug, Clone)]
pub struct OpenAIChatProvider {
    api_key: String,
    model: String,
    tools: Vec<Value>,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAIToolCall>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    kind: String,
    function: OpenAIFunction,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OpenAIToolCall>,
}

impl OpenAIChatProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            model: "gpt-4o".to_string(),
            tools: Vec::new(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.model = model;
        self
    }

    pub fn with_tools(mut self, tools: Vec<Value>) -> Self {
        self.tools = tools;
        self
    }

    fn to_wire(msg: &ChatMessage) -> OpenAIMessage {
        match msg.role.as_str() {
            "tool" => OpenAIMessage {
                role: msg.role.clone(),
                content: msg.content.clone(),
                tool_call_id: msg.tool_call.as_ref().map(|c| c.id.clone()),
                tool_calls: None,
            },
            "assistant" => OpenAIMessage {
                role: msg.role.clone(),
                content: msg.content.clone(),
                tool_call_id: None,
                tool_calls: msg.tool_call.as_ref().map(|c| {
                    vec![OpenAIToolCall {
                        id: c.id.clone(),
                        kind: "function".to_string(),
                        function: OpenAIFunction {
                            name: c.function_name.clone(),
                            arguments: c.args.to_string(),
                        },
                    }]
                }),
            },
            _ => OpenAIMessage {
                role: msg.role.clone(),
                content: msg.content.clone(),
                tool_call_id: None,
                tool_calls: None,
            },
        }
    }

    fn from_wire(call: OpenAIToolCall) -> ToolCall {
        let args = serde_json::from_str(&call.function.arguments)
            .unwrap_or(Value::Object(Default::default()));
        ToolCall {
            id: call.id,
            function_name: call.function.name,
            args,
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAIChatProvider {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse> {
        let request = OpenAIRequest {
            model: self.model.clone(),
            messages: messages.iter().map(Self::to_wire).collect(),
            tools: self.tools.clone(),
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await?;
            anyhow::bail!("OpenAI API error {}: {}", status, body);
        }

        let result: OpenAIResponse = response.json().await?;
        let message = result
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| anyhow::anyhow!("No choices in response"))?;

        Ok(ChatResponse {
            content: message.content,
            tool_calls: message.tool_calls.into_iter().map(Self::from_wire).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_creation() {
        let provider = OpenAIChatProvider::new("test-key".to_string());
        assert_eq!(provider.model, "gpt-4o");
        assert!(provider.tools.is_empty());
    }

    #[test]
    fn test_tool_message_carries_call_id() {
        let call = ToolCall {
            id: "call_9".to_string(),
            function_name: "wait".to_string(),
            args: serde_json::json!({"duration": 5}),
        };
        let wire = OpenAIChatProvider::to_wire(&ChatMessage::tool("ok", call));
        assert_eq!(wire.tool_call_id.as_deref(), Some("call_9"));
        assert!(wire.tool_calls.is_none());
    }

    #[test]
    fn test_from_wire_tolerates_bad_arguments() {
        let call = OpenAIToolCall {
            id: "call_1".to_string(),
            kind: "function".to_string(),
            function: OpenAIFunction {
                name: "report".to_string(),
                arguments: "not json".to_string(),
            },
        };
        let parsed = OpenAIChatProvider::from_wire(call);
        assert_eq!(parsed.function_name, "report");
        assert!(parsed.args.is_object());
    }
}
