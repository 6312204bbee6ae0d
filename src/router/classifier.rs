//! 意图分类器
//!
//! 把对话历史分类为固定路由集合：三个工人之一、FINISH、或普通聊天兜底。
//! 模型自由文本到枚举的字符串匹配只存在于这一处适配层。
//! 输入可能来自语音转写，分类前先用静态的同音词纠正表清洗最新一条用户消息。

use std::sync::Arc;

use crate::handlers::HandlerKind;
use crate::llm::LlmClient;
use crate::session::{Role, Turn};

/// 分类结果：路由到某个工人、纯控制信号的结束、或带回复文本的结束
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    RouteToHandler(HandlerKind),
    /// 结束本轮，不追加新的回复（纯控制信号）
    Finish,
    /// 结束本轮，模型文本即回复（普通聊天兜底）
    FinishWithReply(String),
}

/// 结束令牌（模型输出里出现即视为 FINISH）
const FINISH_TOKEN: &str = "finish";

/// 同音词纠正表：语音转写常见的误听（仅作用于全词，小写比较）
const PHONETIC_FIXES: &[(&str, &str)] = &[
    ("roles", "rolls"),
    ("role", "roll"),
    ("lock", "log"),
    ("locked", "logged"),
    ("stalk", "stock"),
    ("manuel", "manual"),
];

const SUPERVISOR_PROMPT: &str = "You are a factory supervisor. Manage the conversation by routing to the correct worker.\n\n\
- If user wants to LOG output -> route to 'production_agent'.\n\
- If user wants to UPDATE STOCK -> route to 'inventory_agent'.\n\
- If user has an ERROR or needs MANUAL -> route to 'maintenance_agent'.\n\
- If the previous tool output answers the question, or if it is general chat -> route to FINISH.\n\n\
Return the name of the next agent specifically: 'production_agent', 'inventory_agent', 'maintenance_agent', or 'FINISH'.";

/// 意图分类器：一次推理调用 + 固定优先级的标签匹配
pub struct IntentClassifier {
    llm: Arc<dyn LlmClient>,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// 对整段历史做一次分类。推理失败原样上抛，由监督者终止本轮
    /// （绝不在分类失败时猜一个路由）
    pub async fn classify(&self, history: &[Turn]) -> Result<RouteDecision, String> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(Turn::system(SUPERVISOR_PROMPT));
        for (i, turn) in history.iter().enumerate() {
            // 只清洗最新一条用户消息（更早的已经被路由消化过）
            let is_last_user =
                turn.role == Role::User && history[i + 1..].iter().all(|t| t.role != Role::User);
            if is_last_user {
                let mut fixed = turn.clone();
                fixed.content = canonicalize(&turn.content);
                messages.push(fixed);
            } else {
                messages.push(turn.clone());
            }
        }

        let response = self.llm.complete(&messages).await?;
        Ok(decide(&response))
    }
}

/// 模型文本 → 路由决策：按固定优先级做子串匹配，标签互不重叠，首个命中生效
fn decide(response: &str) -> RouteDecision {
    let decision = response.trim().to_lowercase();

    for kind in HandlerKind::all() {
        if decision.contains(kind.label()) {
            return RouteDecision::RouteToHandler(kind);
        }
    }

    if decision.contains(FINISH_TOKEN) {
        return RouteDecision::Finish;
    }

    RouteDecision::FinishWithReply(response.trim().to_string())
}

/// 全词替换常见误听；保持其余文本原样
fn canonicalize(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let lower = word.to_lowercase();
            PHONETIC_FIXES
                .iter()
                .find(|(from, _)| *from == lower)
                .map(|(_, to)| to.to_string())
                .unwrap_or_else(|| word.to_string())
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_labels_route_to_matching_handler() {
        assert_eq!(
            decide("production_agent"),
            RouteDecision::RouteToHandler(HandlerKind::Production)
        );
        assert_eq!(
            decide("Route to the inventory_agent please"),
            RouteDecision::RouteToHandler(HandlerKind::Inventory)
        );
        assert_eq!(
            decide("MAINTENANCE_AGENT"),
            RouteDecision::RouteToHandler(HandlerKind::Maintenance)
        );
    }

    #[test]
    fn finish_token_terminates_without_reply() {
        assert_eq!(decide("FINISH"), RouteDecision::Finish);
        assert_eq!(decide("we should finish here"), RouteDecision::Finish);
    }

    #[test]
    fn unmatched_text_becomes_chat_reply() {
        assert_eq!(
            decide("The weather looks fine today."),
            RouteDecision::FinishWithReply("The weather looks fine today.".to_string())
        );
    }

    #[test]
    fn decision_mapping_is_idempotent() {
        let d1 = decide("production_agent");
        let d2 = decide("production_agent");
        assert_eq!(d1, d2);
    }

    #[test]
    fn canonicalize_fixes_misheard_words() {
        assert_eq!(
            canonicalize("lock 50 roles for machine M1"),
            "log 50 rolls for machine M1"
        );
        assert_eq!(canonicalize("check the Manuel"), "check the manual");
    }
}
