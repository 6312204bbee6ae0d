//! 短期记忆：对话历史
//!
//! 保留最近 N 轮对话，超出时自动剪枝，供 LLM 上下文与回信渲染使用。
//! Tool 角色承载 Handler 的执行结果文本（追加后不可变，顺序即语义）。

use serde::{Deserialize, Serialize};

use crate::handlers::HandlerKind;

/// 消息角色（与 LLM API 一致，Tool 表示 Handler 结果）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// 单条消息；handler 记录产生该消息的 Handler（仅 Tool 角色有）
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub handler: Option<HandlerKind>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            handler: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            handler: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            handler: None,
        }
    }

    pub fn tool(content: impl Into<String>, handler: HandlerKind) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            handler: Some(handler),
        }
    }
}

/// 对话历史：最近 N 轮（每轮约含 user + assistant/tool，故保留约 max_turns*2 条）
#[derive(Clone, Debug)]
pub struct History {
    turns: Vec<Turn>,
    max_turns: usize,
}

impl History {
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: Vec::new(),
            max_turns,
        }
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
        self.prune();
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// 超出 max_turns*2 时丢弃最旧的消息，保留最近部分
    fn prune(&mut self) {
        if self.turns.len() > self.max_turns * 2 {
            let keep = self.max_turns * 2;
            self.turns.drain(..self.turns.len() - keep);
        }
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
