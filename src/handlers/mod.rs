//! 任务 Handler
//!
//! 每个 Handler 包装一个副作用或检索操作，实现 Handler trait
//! （工具名 / 分类标签 / 是否写操作 / 参数 schema / 专属系统提示 / invoke）。
//! 约定：存储与检索错误在 invoke 内部转为 Failure 文本，绝不向监督者抛异常。

pub mod inventory;
pub mod maintenance;
pub mod production;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::ToolSpec;

pub use inventory::InventoryHandler;
pub use maintenance::MaintenanceHandler;
pub use production::ProductionHandler;

/// 三个固定的工人身份；分类器的标签集合与之一一对应
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    Production,
    Inventory,
    Maintenance,
}

impl HandlerKind {
    /// 分类器输出中用于匹配的标签子串（互不重叠，优先级按此顺序）
    pub fn label(&self) -> &'static str {
        match self {
            HandlerKind::Production => "production",
            HandlerKind::Inventory => "inventory",
            HandlerKind::Maintenance => "maintenance",
        }
    }

    /// 按优先级排列的全部身份
    pub fn all() -> [HandlerKind; 3] {
        [
            HandlerKind::Production,
            HandlerKind::Inventory,
            HandlerKind::Maintenance,
        ]
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Handler 执行结果。状态符号是呈现约定而非结构化状态：
/// 写操作的成功文本自带 "✅ " 前缀（与检索类的原样输出区分），失败统一加 "❌ "
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    Success(String),
    Failure(String),
}

impl HandlerOutcome {
    pub fn render(&self) -> String {
        match self {
            HandlerOutcome::Success(text) => text.clone(),
            HandlerOutcome::Failure(reason) => format!("❌ {reason}"),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, HandlerOutcome::Success(_))
    }
}

/// 任务 Handler trait
#[async_trait]
pub trait Handler: Send + Sync {
    fn kind(&self) -> HandlerKind;

    /// 工具名（LLM 工具调用中的函数名）
    fn tool_name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 是否改写持久状态（写操作须过确认闸）
    fn mutating(&self) -> bool;

    /// 参数 JSON Schema（供 LLM 生成正确的参数格式）
    fn parameters_schema(&self) -> Value;

    /// 派发到该 Handler 时使用的系统提示
    fn agent_prompt(&self) -> &str;

    /// 执行；任何底层错误就地转为 Failure
    async fn invoke(&self, args: Value) -> HandlerOutcome;
}

/// 把 Handler 的工具面转为 LLM 的 ToolSpec
pub fn tool_spec(handler: &dyn Handler) -> ToolSpec {
    ToolSpec {
        name: handler.tool_name().to_string(),
        description: handler.description().to_string(),
        parameters: handler.parameters_schema(),
    }
}

/// Handler 注册表：按身份存储，供监督者派发
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<HandlerKind, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: impl Handler + 'static) {
        self.handlers.insert(handler.kind(), Arc::new(handler));
    }

    pub fn get(&self, kind: HandlerKind) -> Option<Arc<dyn Handler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
