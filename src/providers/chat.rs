use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub function_name: String,
    #[serde(default)]
    pub args: Value,
}

/// One entry of a worker transcript. Roles follow the usual chat-completion
/// convention: `system`, `user`, `assistant`, `tool`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Option<String>,
    #[serde(default)]
    pub tool_call: Option<ToolCall>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: Some(content.into()),
            tool_call: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(content.into()),
            tool_call: None,
        }
    }

    pub fn assistant(content: Option<String>, tool_call: Option<ToolCall>) -> Self {
        Self {
            role: "assistant".to_string(),
            content,
            tool_call,
        }
    }

    pub fn tool(content: impl Into<String>, tool_call: ToolCall) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content.into()),
            tool_call: Some(tool_call),
        }
    }
}

/// A single model turn: optional text plus zero or more tool calls.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

/// Normalizes LM vendor calls into a single stateless capability.
/// The worker owns the transcript; providers only see a snapshot per turn.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let sys = ChatMessage::system("prompt");
        assert_eq!(sys.role, "system");
        assert_eq!(sys.content.as_deref(), Some("prompt"));
        assert!(sys.tool_call.is_none());

        let call = ToolCall {
            id: "call_1".to_string(),
            function_name: "report".to_string(),
            args: serde_json::json!({"content": "done"}),
        };
        let tool = ChatMessage::tool("done", call);
        assert_eq!(tool.role, "tool");
        assert_eq!(
            tool.tool_call.unwrap().function_name,
            "report".to_string()
        );
    }

    #[test]
    fn test_message_roundtrip_ignores_unknown_fields() {
        let raw = r#"{"role":"user","content":"hi","tool_call":null,"extra":42}"#;
        let msg: ChatMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.role, "user");
        assert_eq!(msg.content.as_deref(), Some("hi"));
    }
}
