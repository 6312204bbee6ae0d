//! 确认闸：写操作的安全锁
//!
//! 每个发送者一个两态状态机：Idle / AwaitingConfirmation。
//! 写操作被拦截后挂起为 PendingAction，下一条消息里肯定词执行、否定词取消；
//! 其余回复按显式策略处理（默认再追问一次，避免手误取消合法操作）。
//! 同一发送者最多一个挂起动作；新的写请求会替换旧的。挂起动作带 TTL。

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::handlers::HandlerKind;

/// 肯定词（小写、去空白后全词比较）
const AFFIRMATIVE: &[&str] = &["yes", "ok", "confirm", "haan"];
/// 否定词
const NEGATIVE: &[&str] = &["no", "cancel", "stop"];

/// 取消时的固定回执
pub const CANCELLED_ACK: &str = "❌ Cancelled.";

/// 待确认回复既非肯定也非否定时的策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnrecognizedReplyPolicy {
    /// 照搬来源行为：任何无法识别的回复直接取消
    CancelSilently,
    /// 追问一次；第二次仍无法识别才取消
    RepromptOnce,
}

/// 挂起的写操作
#[derive(Debug, Clone)]
pub struct PendingAction {
    pub handler: HandlerKind,
    pub tool_name: String,
    pub args: Value,
    pub created_at: DateTime<Utc>,
}

impl PendingAction {
    pub fn new(handler: HandlerKind, tool_name: impl Into<String>, args: Value) -> Self {
        Self {
            handler,
            tool_name: tool_name.into(),
            args,
            created_at: Utc::now(),
        }
    }
}

/// 闸门状态（归属 Session，随发送者持久）
#[derive(Debug, Clone, Default)]
pub enum GateState {
    #[default]
    Idle,
    AwaitingConfirmation {
        pending: PendingAction,
        /// 已经追问过一次
        reprompted: bool,
    },
}

impl GateState {
    pub fn is_awaiting(&self) -> bool {
        matches!(self, GateState::AwaitingConfirmation { .. })
    }
}

/// resolve 的结果：由调用方决定回复文本与是否执行
#[derive(Debug)]
pub enum GateOutcome {
    /// 无挂起动作（或已过期被丢弃），消息按普通路由处理
    NotPending,
    /// 肯定回复：执行挂起动作（恰好一次，使用当初抽取的参数）
    Execute(PendingAction),
    /// 否定或按策略取消
    Cancelled,
    /// 追问一次，附带追问文本
    Reprompt(String),
}

/// 确认闸
pub struct ConfirmationGate {
    pending_ttl: Duration,
    policy: UnrecognizedReplyPolicy,
}

impl ConfirmationGate {
    pub fn new(pending_ttl_secs: u64, policy: UnrecognizedReplyPolicy) -> Self {
        Self {
            pending_ttl: Duration::seconds(pending_ttl_secs as i64),
            policy,
        }
    }

    /// 拦截一个写操作：挂起并生成确认提示。已有挂起动作时替换之
    pub fn intercept(&self, state: &mut GateState, pending: PendingAction) -> String {
        if let GateState::AwaitingConfirmation { pending: old, .. } = state {
            tracing::warn!(
                old = %old.tool_name,
                new = %pending.tool_name,
                "replacing pending action before confirmation"
            );
        }
        let prompt = confirmation_prompt(&pending);
        *state = GateState::AwaitingConfirmation {
            pending,
            reprompted: false,
        };
        prompt
    }

    /// 用下一条消息裁决挂起动作；无挂起（或已过期）时返回 NotPending
    pub fn resolve(&self, state: &mut GateState, reply: &str, now: DateTime<Utc>) -> GateOutcome {
        let (pending, reprompted) = match state {
            GateState::Idle => return GateOutcome::NotPending,
            GateState::AwaitingConfirmation {
                pending,
                reprompted,
            } => (pending.clone(), *reprompted),
        };

        if now - pending.created_at > self.pending_ttl {
            tracing::info!(tool = %pending.tool_name, "pending action expired");
            *state = GateState::Idle;
            return GateOutcome::NotPending;
        }

        let normalized = reply.trim().to_lowercase();

        if AFFIRMATIVE.contains(&normalized.as_str()) {
            *state = GateState::Idle;
            return GateOutcome::Execute(pending);
        }

        if NEGATIVE.contains(&normalized.as_str()) {
            *state = GateState::Idle;
            return GateOutcome::Cancelled;
        }

        match self.policy {
            UnrecognizedReplyPolicy::CancelSilently => {
                *state = GateState::Idle;
                GateOutcome::Cancelled
            }
            UnrecognizedReplyPolicy::RepromptOnce if !reprompted => {
                let text = format!(
                    "🤔 I didn't catch that. Reply 'YES' to run {} or 'NO' to cancel.",
                    pending.tool_name
                );
                *state = GateState::AwaitingConfirmation {
                    pending,
                    reprompted: true,
                };
                GateOutcome::Reprompt(text)
            }
            UnrecognizedReplyPolicy::RepromptOnce => {
                *state = GateState::Idle;
                GateOutcome::Cancelled
            }
        }
    }
}

/// 确认提示文本（不作为已提交动作计入历史）
pub fn confirmation_prompt(pending: &PendingAction) -> String {
    format!(
        "✋ WAIT. You want to {} with {}. Reply 'YES' to confirm.",
        pending.tool_name, pending.args
    )
}
