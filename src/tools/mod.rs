pub mod flow;
pub mod persist;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::providers::ToolCall;
use crate::storage::Storage;

/// Tool-call name that ends a worker run.
pub const REPORT_TOOL_NAME: &str = "report";

/// A named function the model may invoke. Results are plain strings that
/// get appended to the transcript as `tool` messages; handlers convert
/// their own failures into `"Error: …"` strings rather than failing the turn.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;

    async fn call(&self, args: &Value) -> String;
}

/// Fixed name → handler map dispatching tool invocations from LM responses.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        let mut tools: HashMap<String, Box<dyn Tool>> = HashMap::new();
        for tool in [
            Box::new(persist::SaveContentTool::new(storage.clone())) as Box<dyn Tool>,
            Box::new(persist::SearchContentTool::new(storage)),
            Box::new(flow::WaitTool),
            Box::new(flow::ReportTool),
        ] {
            tools.insert(tool.name().to_string(), tool);
        }
        Self { tools }
    }

    /// Function schemas in the chat-completions `tools` shape, advertised
    /// to the provider on every turn.
    pub fn schemas(&self) -> Vec<Value> {
        let mut schemas: Vec<Value> = self
            .tools
            .values()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name(),
                        "description": tool.description(),
                        "parameters": tool.parameters_schema(),
                    }
                })
            })
            .collect();
        schemas.sort_by_key(|s| s["function"]["name"].as_str().unwrap_or("").to_string());
        schemas
    }

    /// Unknown names produce an empty result; they do not fail the turn.
    pub async fn dispatch(&self, call: &ToolCall) -> String {
        match self.tools.get(&call.function_name) {
            Some(tool) => tool.call(&call.args).await,
            None => {
                log::warn!("tools: unknown tool call {}", call.function_name);
                String::new()
            }
        }
    }
}
