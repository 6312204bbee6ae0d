//! 大脑：单条入站消息的完整处理管线
//!
//! 顺序固定：先让确认闸裁决挂起的写操作（肯定执行 / 否定取消 / 其余按策略），
//! 无挂起才进监督者做路由。每条入站消息恰好产出一条出站回复文本。
//! 推理链路的任何失败都上抛为 BrainError，由调用方换成统一的道歉话术，
//! 绝不在失败时猜测路由或执行写操作。

use std::sync::Arc;

use chrono::Utc;

use crate::config::AppSection;
use crate::error::BrainError;
use crate::handlers::HandlerRegistry;
use crate::llm::LlmClient;
use crate::router::{
    ConfirmationGate, GateOutcome, Supervisor, TurnStep, CANCELLED_ACK,
};
use crate::session::{Session, Turn};

/// 推理链路失败时的统一回复（本轮作废，不改写任何状态）
pub const APOLOGY: &str = "😵 Sorry, something went wrong on my side. Please try again.";

/// 大脑：监督者 + 确认闸，无会话态（会话态随 Session 传入）
pub struct Brain {
    supervisor: Supervisor,
    gate: ConfirmationGate,
}

impl Brain {
    pub fn new(llm: Arc<dyn LlmClient>, handlers: Arc<HandlerRegistry>, app: &AppSection) -> Self {
        Self {
            supervisor: Supervisor::new(llm, handlers, app.max_route_passes),
            gate: ConfirmationGate::new(app.pending_ttl_secs, app.on_unrecognized_reply),
        }
    }

    /// 处理一条入站文本，返回本轮的唯一出站回复
    pub async fn handle_message(
        &self,
        session: &mut Session,
        text: &str,
    ) -> Result<String, BrainError> {
        session.touch();
        tracing::debug!(sender = %session.sender, "handling turn");

        match self.gate.resolve(&mut session.gate, text, Utc::now()) {
            GateOutcome::Execute(pending) => {
                // 执行当初抽取的参数，本条消息不再参与路由
                let outcome = self
                    .supervisor
                    .execute(pending.handler, pending.args)
                    .await?;
                let rendered = outcome.render();
                session.history.push(Turn::user(text));
                session
                    .history
                    .push(Turn::tool(rendered.clone(), pending.handler));
                return Ok(rendered);
            }
            GateOutcome::Cancelled => {
                session.history.push(Turn::user(text));
                session.history.push(Turn::assistant(CANCELLED_ACK));
                return Ok(CANCELLED_ACK.to_string());
            }
            GateOutcome::Reprompt(prompt) => {
                // 追问不入史：挂起动作保持原样
                return Ok(prompt);
            }
            GateOutcome::NotPending => {}
        }

        session.history.push(Turn::user(text));

        match self.supervisor.run_turn(&mut session.history).await? {
            TurnStep::Reply(reply) => Ok(reply),
            TurnStep::Intercept(pending) => {
                // 确认提示不入史：动作尚未提交
                let prompt = self.gate.intercept(&mut session.gate, pending);
                Ok(prompt)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::config::AppConfig;
    use crate::handlers::{InventoryHandler, MaintenanceHandler, ProductionHandler};
    use crate::llm::mock::{FailingLlm, ScriptedLlm};
    use crate::manual::testing::HashEmbedder;
    use crate::manual::{ChunkingConfig, ManualIndex};
    use crate::store::Store;

    async fn registry(store: &Store) -> Arc<HandlerRegistry> {
        let mut reg = HandlerRegistry::new();
        reg.register(ProductionHandler::new(store.clone()));
        reg.register(InventoryHandler::new(store.clone()));
        reg.register(MaintenanceHandler::new(
            Arc::new(ManualIndex::new(
                Arc::new(HashEmbedder),
                ChunkingConfig::default(),
            )),
            3,
        ));
        Arc::new(reg)
    }

    #[tokio::test]
    async fn mutating_route_pauses_then_executes_on_yes() {
        let store = Store::in_memory().await.unwrap();
        let llm = Arc::new(ScriptedLlm::default());
        llm.push_text("production_agent");
        llm.push_tool_call("log_production", json!({ "machine_id": "M1", "rolls": 50 }));

        let cfg = AppConfig::default();
        let brain = Brain::new(llm.clone(), registry(&store).await, &cfg.app);
        let mut session = Session::new("whatsapp:+1555", cfg.app.max_context_turns);

        let reply = brain
            .handle_message(&mut session, "log 50 rolls for machine M1")
            .await
            .unwrap();
        assert!(reply.starts_with("✋ WAIT."));
        assert!(reply.contains("log_production"));
        assert!(session.gate.is_awaiting());

        let reply = brain.handle_message(&mut session, "yes").await.unwrap();
        assert!(reply.starts_with("✅ Success. Logged to Database. ID:"));
        assert!(!session.gate.is_awaiting());
    }

    #[tokio::test]
    async fn negative_reply_cancels_pending_action() {
        let store = Store::in_memory().await.unwrap();
        let llm = Arc::new(ScriptedLlm::default());
        llm.push_text("inventory_agent");
        llm.push_tool_call(
            "update_stock",
            json!({ "product_name": "Glue", "quantity_change": 5 }),
        );

        let cfg = AppConfig::default();
        let brain = Brain::new(llm.clone(), registry(&store).await, &cfg.app);
        let mut session = Session::new("whatsapp:+1555", cfg.app.max_context_turns);

        brain
            .handle_message(&mut session, "add 5 glue to stock")
            .await
            .unwrap();
        let reply = brain.handle_message(&mut session, "no").await.unwrap();
        assert_eq!(reply, CANCELLED_ACK);
        // 未执行：产品不存在
        assert!(store.find_product_exact("Glue").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn general_chat_replies_raw_text_without_handlers() {
        let store = Store::in_memory().await.unwrap();
        let llm = Arc::new(ScriptedLlm::default());
        llm.push_text("It is sunny in the factory yard today.");

        let cfg = AppConfig::default();
        let brain = Brain::new(llm.clone(), registry(&store).await, &cfg.app);
        let mut session = Session::new("whatsapp:+1555", cfg.app.max_context_turns);

        let reply = brain
            .handle_message(&mut session, "how's the weather")
            .await
            .unwrap();
        assert_eq!(reply, "It is sunny in the factory yard today.");
    }

    #[tokio::test]
    async fn classifier_failure_aborts_turn() {
        let store = Store::in_memory().await.unwrap();
        let cfg = AppConfig::default();
        let brain = Brain::new(Arc::new(FailingLlm), registry(&store).await, &cfg.app);
        let mut session = Session::new("whatsapp:+1555", cfg.app.max_context_turns);

        let err = brain
            .handle_message(&mut session, "log 50 rolls")
            .await
            .unwrap_err();
        assert!(matches!(err, BrainError::Classifier(_)));
    }

    #[tokio::test]
    async fn read_only_route_runs_without_confirmation() {
        let store = Store::in_memory().await.unwrap();
        let llm = Arc::new(ScriptedLlm::default());
        llm.push_text("maintenance_agent");
        llm.push_tool_call("consult_manual", json!({ "query": "Error 502" }));
        // 检索结果没有状态标记，监督者会再问一次分类器
        llm.push_text("FINISH");

        let cfg = AppConfig::default();
        let brain = Brain::new(llm.clone(), registry(&store).await, &cfg.app);
        let mut session = Session::new("whatsapp:+1555", cfg.app.max_context_turns);

        let reply = brain
            .handle_message(&mut session, "how do I fix Error 502")
            .await
            .unwrap();
        assert_eq!(reply, "No relevant info found in manuals.");
        assert!(!session.gate.is_awaiting());
    }
}
