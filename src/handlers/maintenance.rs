//! 维修手册 Handler（只读，免确认）

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::handlers::{Handler, HandlerKind, HandlerOutcome};
use crate::manual::ManualIndex;

/// 检索为空时的固定回复
pub const NO_RELEVANT_INFO: &str = "No relevant info found in manuals.";

/// 对手册索引做 top-k 相似检索，按检索顺序拼接段落
pub struct MaintenanceHandler {
    index: Arc<ManualIndex>,
    top_k: usize,
}

impl MaintenanceHandler {
    pub fn new(index: Arc<ManualIndex>, top_k: usize) -> Self {
        Self { index, top_k }
    }
}

#[async_trait]
impl Handler for MaintenanceHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Maintenance
    }

    fn tool_name(&self) -> &str {
        "consult_manual"
    }

    fn description(&self) -> &str {
        "Use this to find solutions for error codes (e.g. 'Error 502'), fix machines, or look up procedures in the manual."
    }

    fn mutating(&self) -> bool {
        false
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Free-text question, e.g. 'How to fix Error 502?'" }
            },
            "required": ["query"]
        })
    }

    fn agent_prompt(&self) -> &str {
        "You are a Maintenance Expert. Consult the manual to solve errors."
    }

    async fn invoke(&self, args: Value) -> HandlerOutcome {
        let query = match args.get("query").and_then(|v| v.as_str()) {
            Some(q) => q,
            None => {
                return HandlerOutcome::Failure("Error searching manual: missing query".to_string())
            }
        };

        match self.index.search(query, self.top_k).await {
            Ok(results) if results.is_empty() => {
                HandlerOutcome::Success(NO_RELEVANT_INFO.to_string())
            }
            Ok(results) => {
                let passages: Vec<String> =
                    results.into_iter().map(|r| r.chunk.text).collect();
                HandlerOutcome::Success(passages.join("\n\n"))
            }
            Err(e) => HandlerOutcome::Failure(format!("Error searching manual: {e}")),
        }
    }
}
