use async_trait::async_trait;
use serde_json::{json, Value};

use super::Tool;

/// Cooperative pacing hint for the model. It confirms the wait without
/// sleeping; the worker ticker provides the actual pacing.
pub struct WaitTool;

#[async_trait]
impl Tool for WaitTool {
    fn name(&self) -> &str {
        "wait"
    }

    fn description(&self) -> &str {
        "Wait for a period of time before continuing the task"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "duration": {
                    "type": "integer",
                    "description": "The duration of time to wait in seconds",
                }
            },
            "required": ["duration"],
        })
    }

    async fn call(&self, args: &Value) -> String {
        let Some(duration) = args.get("duration").and_then(|d| d.as_f64()) else {
            return "Error: missing required argument: duration".to_string();
        };
        format!("Waiting for {} seconds before continuing the task", duration)
    }
}

/// Terminal tool: the caller treats its result as the final response.
pub struct ReportTool;

#[async_trait]
impl Tool for ReportTool {
    fn name(&self) -> &str {
        "report"
    }

    fn description(&self) -> &str {
        "Finish the task and report the results to the user"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "The content of your findings to report to the user",
                }
            },
            "required": ["content"],
        })
    }

    async fn call(&self, args: &Value) -> String {
        match args.get("content").and_then(|c| c.as_str()) {
            Some(content) => content.to_string(),
            None => "Error: missing required argument: content".to_string(),
        }
    }
}
