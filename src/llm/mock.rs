//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按脚本顺序吐出预设回复：文本或工具调用，两个接口共用同一队列，
//! 便于精确驱动 监督者 → Handler → 监督者 的多次往返。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{LlmClient, LlmReply, ToolSpec};
use crate::session::Turn;

/// 脚本化客户端：每次调用弹出一条预设回复；脚本耗尽后返回错误
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<LlmReply>>,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<LlmReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
        }
    }

    /// 追加一条文本回复
    pub fn push_text(&self, text: impl Into<String>) {
        self.replies
            .lock()
            .unwrap()
            .push_back(LlmReply::Text(text.into()));
    }

    /// 追加一条工具调用回复
    pub fn push_tool_call(&self, name: impl Into<String>, args: Value) {
        self.replies.lock().unwrap().push_back(LlmReply::ToolCall {
            name: name.into(),
            args,
        });
    }

    fn pop(&self) -> Result<LlmReply, String> {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| "ScriptedLlm: script exhausted".to_string())
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, _messages: &[Turn]) -> Result<String, String> {
        match self.pop()? {
            LlmReply::Text(t) => Ok(t),
            LlmReply::ToolCall { name, .. } => {
                Err(format!("ScriptedLlm: expected text, scripted tool call {name}"))
            }
        }
    }

    async fn complete_with_tools(
        &self,
        _messages: &[Turn],
        _tools: &[ToolSpec],
    ) -> Result<LlmReply, String> {
        self.pop()
    }
}

/// 始终失败的客户端：模拟推理后端不可达
pub struct FailingLlm;

#[async_trait]
impl LlmClient for FailingLlm {
    async fn complete(&self, _messages: &[Turn]) -> Result<String, String> {
        Err("connection refused".to_string())
    }

    async fn complete_with_tools(
        &self,
        _messages: &[Turn],
        _tools: &[ToolSpec],
    ) -> Result<LlmReply, String> {
        Err("connection refused".to_string())
    }
}
