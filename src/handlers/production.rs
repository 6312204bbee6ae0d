//! 生产记录 Handler（写操作）

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::handlers::{Handler, HandlerKind, HandlerOutcome};
use crate::store::Store;

/// 把 (machine_id, rolls) 写入 production_logs，成功时回报自增 id
pub struct ProductionHandler {
    store: Store,
}

impl ProductionHandler {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Handler for ProductionHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Production
    }

    fn tool_name(&self) -> &str {
        "log_production"
    }

    fn description(&self) -> &str {
        "Log production output. Use when user says 'log', 'record', or 'save'."
    }

    fn mutating(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "machine_id": { "type": "string", "description": "Machine identifier, e.g. M1" },
                "rolls": { "type": "integer", "description": "Number of rolls produced" }
            },
            "required": ["machine_id", "rolls"]
        })
    }

    fn agent_prompt(&self) -> &str {
        "You are a Production Logger. Your ONLY job is to log production data to the database using the provided tool. If successful, confirm the ID."
    }

    async fn invoke(&self, args: Value) -> HandlerOutcome {
        let machine_id = match args.get("machine_id").and_then(|v| v.as_str()) {
            Some(m) => m.to_string(),
            None => return HandlerOutcome::Failure("Error logging: missing machine_id".to_string()),
        };
        let rolls = match args.get("rolls").and_then(|v| v.as_i64()) {
            Some(r) => r,
            None => return HandlerOutcome::Failure("Error logging: missing rolls".to_string()),
        };

        match self.store.insert_production(&machine_id, rolls).await {
            Ok(id) => HandlerOutcome::Success(format!("✅ Success. Logged to Database. ID: {id}")),
            Err(e) => HandlerOutcome::Failure(format!("Error logging: {e}")),
        }
    }
}
