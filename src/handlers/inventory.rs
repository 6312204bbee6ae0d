//! 库存 Handler（写操作）
//!
//! 名称匹配两级：先不区分大小写的精确匹配；未命中再做子串匹配。
//! 子串命中多于一个产品时不猜测，直接报歧义并列出候选。

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::handlers::{Handler, HandlerKind, HandlerOutcome};
use crate::store::Store;

/// 按带符号的增量调整产品库存；产品不存在时以 0 库存自动建档
pub struct InventoryHandler {
    store: Store,
}

impl InventoryHandler {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// 解析名称到唯一产品 id；Err 为用户可读的失败文本
    async fn resolve_product(&self, name: &str) -> Result<i64, String> {
        match self.store.find_product_exact(name).await {
            Ok(Some(p)) => return Ok(p.id),
            Ok(None) => {}
            Err(e) => return Err(format!("Error updating stock: {e}")),
        }

        let candidates = self
            .store
            .find_products_partial(name)
            .await
            .map_err(|e| format!("Error updating stock: {e}"))?;

        match candidates.len() {
            0 => self
                .store
                .create_product(name)
                .await
                .map_err(|e| format!("Error updating stock: {e}")),
            1 => Ok(candidates[0].id),
            _ => {
                let names: Vec<&str> = candidates.iter().map(|p| p.name.as_str()).collect();
                Err(format!(
                    "Ambiguous product '{}': matches {}. Please use the exact name.",
                    name,
                    names.join(", ")
                ))
            }
        }
    }
}

#[async_trait]
impl Handler for InventoryHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Inventory
    }

    fn tool_name(&self) -> &str {
        "update_stock"
    }

    fn description(&self) -> &str {
        "Update inventory. Positive int to ADD, Negative to REMOVE."
    }

    fn mutating(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "product_name": { "type": "string", "description": "Product name, e.g. Glue" },
                "quantity_change": { "type": "integer", "description": "Signed delta to apply" }
            },
            "required": ["product_name", "quantity_change"]
        })
    }

    fn agent_prompt(&self) -> &str {
        "You are an Inventory Manager. Update stock levels using the database tool."
    }

    async fn invoke(&self, args: Value) -> HandlerOutcome {
        let product_name = match args.get("product_name").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => {
                return HandlerOutcome::Failure(
                    "Error updating stock: missing product_name".to_string(),
                )
            }
        };
        let delta = match args.get("quantity_change").and_then(|v| v.as_i64()) {
            Some(d) => d,
            None => {
                return HandlerOutcome::Failure(
                    "Error updating stock: missing quantity_change".to_string(),
                )
            }
        };

        let product_id = match self.resolve_product(&product_name).await {
            Ok(id) => id,
            Err(reason) => return HandlerOutcome::Failure(reason),
        };

        match self.store.adjust_quantity(product_id, delta).await {
            Ok(qty) => HandlerOutcome::Success(format!("✅ Stock Updated. {product_name}: {qty}")),
            Err(e) => HandlerOutcome::Failure(format!("Error updating stock: {e}")),
        }
    }
}
