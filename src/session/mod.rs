//! 会话层：每个发送者一份短期记忆 + 闸门状态 + 串行工人

pub mod manager;
pub mod turn;

pub use manager::{SessionManager, SessionSettings, DEADLINE_NOTICE};
pub use turn::{History, Role, Turn};

use chrono::{DateTime, Utc};

use crate::router::GateState;

/// 单个发送者的会话状态。发送者号码即会话键，跨消息存续
pub struct Session {
    pub sender: String,
    pub history: History,
    pub gate: GateState,
    pub last_active: DateTime<Utc>,
}

impl Session {
    pub fn new(sender: impl Into<String>, max_context_turns: usize) -> Self {
        Self {
            sender: sender.into(),
            history: History::new(max_context_turns),
            gate: GateState::default(),
            last_active: Utc::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_active = Utc::now();
    }
}
