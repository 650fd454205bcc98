use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::Tool;
use crate::storage::Storage;

pub struct SaveContentTool {
    storage: Arc<dyn Storage>,
}

impl SaveContentTool {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl Tool for SaveContentTool {
    fn name(&self) -> &str {
        "save_content"
    }

    fn description(&self) -> &str {
        "Save the content to the storage"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "The content to save to the storage",
                }
            },
            "required": ["content"],
        })
    }

    async fn call(&self, args: &Value) -> String {
        let Some(content) = args.get("content").and_then(|c| c.as_str()) else {
            return "Error: missing required argument: content".to_string();
        };
        match self.storage.save_post(content).await {
            Ok(()) => format!(
                "Content saved successfully. (content total length: {})",
                content.len()
            ),
            Err(err) => {
                log::error!("persist tool: save_content failed: {}", err);
                format!("Error: {}", err)
            }
        }
    }
}

pub struct SearchContentTool {
    storage: Arc<dyn Storage>,
}

impl SearchContentTool {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl Tool for SearchContentTool {
    fn name(&self) -> &str {
        "search_content"
    }

    fn description(&self) -> &str {
        "Search the content in the storage."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The query to search the content in the storage. Keep the query as simple as possible, best to be a single word.",
                }
            },
            "required": ["query"],
        })
    }

    async fn call(&self, args: &Value) -> String {
        let Some(query) = args.get("query").and_then(|q| q.as_str()) else {
            return "Error: missing required argument: query".to_string();
        };
        match self.storage.search_posts(query).await {
            Ok(results) => format!(
                "Results Found (separated by comma): {}",
                results.join(", ")
            ),
            Err(err) => {
                log::error!("persist tool: search_content failed: {}", err);
                format!("Error: {}", err)
            }
        }
    }
}
