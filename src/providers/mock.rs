use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use super::chat::{ChatMessage, ChatProvider, ChatResponse, ToolCall};

/// Scripted provider for tests. Responses are served in order; once the
/// script is exhausted the last entry repeats, so a non-terminal tail keeps
/// a worker busy indefinitely.
pub struct MockChatProvider {
    script: Vec<ChatResponse>,
    calls: Arc<AtomicUsize>,
}

impl MockChatProvider {
    pub fn new(script: Vec<ChatResponse>) -> Self {
        Self {
            script,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A provider that immediately reports the given content.
    pub fn reporting(content: impl Into<String>) -> Self {
        Self::new(vec![ChatResponse {
            content: None,
            tool_calls: vec![tool_call("report", json!({"content": content.into()}))],
        }])
    }

    /// A provider that keeps asking to wait and never terminates.
    pub fn idling() -> Self {
        Self::new(vec![ChatResponse {
            content: None,
            tool_calls: vec![tool_call("wait", json!({"duration": 1}))],
        }])
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Shared handle to the call counter, usable after the provider has been
    /// moved behind a trait object.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

pub fn tool_call(name: &str, args: serde_json::Value) -> ToolCall {
    ToolCall {
        id: format!("call_{}", name),
        function_name: name.to_string(),
        args,
    }
}

#[async_trait]
impl ChatProvider for MockChatProvider {
    async fn chat(&self, _messages: &[ChatMessage]) -> Result<ChatResponse> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let idx = n.min(self.script.len().saturating_sub(1));
        self.script
            .get(idx)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("mock script is empty"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_repeats_last_entry() {
        let provider = MockChatProvider::idling();
        for _ in 0..3 {
            let resp = provider.chat(&[]).await.unwrap();
            assert_eq!(resp.tool_calls[0].function_name, "wait");
        }
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_reporting_provider() {
        let provider = MockChatProvider::reporting("all done");
        let resp = provider.chat(&[]).await.unwrap();
        assert_eq!(resp.tool_calls[0].function_name, "report");
        assert_eq!(resp.tool_calls[0].args["content"], "all done");
    }
}
