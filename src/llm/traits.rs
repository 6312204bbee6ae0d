//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient：complete（纯文本）、
//! complete_with_tools（带工具 schema，可能返回结构化工具调用）。

use async_trait::async_trait;
use serde_json::Value;

use crate::session::Turn;

/// 提供给模型的工具描述（名称 + 说明 + 参数 JSON Schema）
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 带工具的推理结果：纯文本回复，或一次结构化工具调用
#[derive(Debug, Clone)]
pub enum LlmReply {
    Text(String),
    ToolCall { name: String, args: Value },
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 纯文本完成
    async fn complete(&self, messages: &[Turn]) -> Result<String, String>;

    /// 带工具 schema 的完成；模型可返回文本或工具调用
    async fn complete_with_tools(
        &self,
        messages: &[Turn],
        tools: &[ToolSpec],
    ) -> Result<LlmReply, String>;
}
