//! 路由层：意图分类 → 监督者状态机 → 确认闸

pub mod classifier;
pub mod confirm;
pub mod supervisor;

pub use classifier::{IntentClassifier, RouteDecision};
pub use confirm::{
    confirmation_prompt, ConfirmationGate, GateOutcome, GateState, PendingAction,
    UnrecognizedReplyPolicy, CANCELLED_ACK,
};
pub use supervisor::{Supervisor, TurnStep, EMPTY_TURN_ACK};
