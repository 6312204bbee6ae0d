//! 监督者（路由器）
//!
//! 每轮：Routing 问分类器 → Dispatching 派发工人 → 结果回填历史 → 回到 Routing，
//! 由分类器决定是否结束。两条防环规则：最近一条是结果标记（✅/❌ 前缀）时强制结束；
//! 单轮路由次数设上限。写操作在派发处被拦截，交还调用方走确认闸。
//!
//! 安全约束：分类失败时终止本轮并报错，绝不猜测路由（防止误执行写操作）。

use std::sync::Arc;

use serde_json::Value;

use crate::error::BrainError;
use crate::handlers::{tool_spec, HandlerKind, HandlerOutcome, HandlerRegistry};
use crate::llm::{LlmClient, LlmReply};
use crate::router::classifier::{IntentClassifier, RouteDecision};
use crate::router::confirm::PendingAction;
use crate::session::{History, Role, Turn};

/// 本轮没有产出任何内容时的兜底回复（保证每轮恰好一条出站消息）
pub const EMPTY_TURN_ACK: &str = "OK.";

/// 单轮状态机的状态（Terminated 为唯一终态；会话本身跨轮存续）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SupervisorState {
    Routing,
    Dispatching(HandlerKind),
    Terminated,
}

/// 一轮路由的结果
#[derive(Debug)]
pub enum TurnStep {
    /// 终态：本轮的唯一出站回复
    Reply(String),
    /// 写操作被拦截，待调用方挂起确认
    Intercept(PendingAction),
}

enum DispatchResult {
    /// 工人执行完毕（结果已渲染为文本）
    ToolResult(String),
    /// 工人模型直接给出文本（如追问澄清）
    AgentText(String),
    /// 写操作，未执行
    Intercept(PendingAction),
}

/// 监督者
pub struct Supervisor {
    classifier: IntentClassifier,
    llm: Arc<dyn LlmClient>,
    handlers: Arc<HandlerRegistry>,
    max_route_passes: usize,
}

impl Supervisor {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        handlers: Arc<HandlerRegistry>,
        max_route_passes: usize,
    ) -> Self {
        Self {
            classifier: IntentClassifier::new(llm.clone()),
            llm,
            handlers,
            max_route_passes,
        }
    }

    /// 跑完一轮：调用前用户消息已在历史末尾。
    /// 返回 Reply（终态）或 Intercept（写操作待确认）
    pub async fn run_turn(&self, history: &mut History) -> Result<TurnStep, BrainError> {
        let mut state = SupervisorState::Routing;
        let mut produced: Option<String> = None;
        let mut passes = 0usize;

        loop {
            match state {
                SupervisorState::Terminated => break,
                SupervisorState::Routing => {
                    if passes >= self.max_route_passes {
                        tracing::warn!(passes, "route pass cap reached");
                        break;
                    }
                    passes += 1;

                    // 防环规则：最近一条已是结果标记，直接终止
                    if let Some(last) = history.last() {
                        if last.role == Role::Tool && is_result_marker(&last.content) {
                            produced = Some(last.content.clone());
                            state = SupervisorState::Terminated;
                            continue;
                        }
                    }

                    let decision = self
                        .classifier
                        .classify(history.turns())
                        .await
                        .map_err(BrainError::Classifier)?;
                    tracing::debug!(?decision, passes, "supervisor routing");

                    state = match decision {
                        RouteDecision::RouteToHandler(kind) => {
                            SupervisorState::Dispatching(kind)
                        }
                        // 纯控制信号：不追加新回合
                        RouteDecision::Finish => SupervisorState::Terminated,
                        RouteDecision::FinishWithReply(text) => {
                            history.push(Turn::assistant(text.clone()));
                            produced = Some(text);
                            SupervisorState::Terminated
                        }
                    };
                }
                SupervisorState::Dispatching(kind) => {
                    state = match self.dispatch(kind, history).await? {
                        DispatchResult::ToolResult(text) => {
                            history.push(Turn::tool(text.clone(), kind));
                            produced = Some(text);
                            SupervisorState::Routing
                        }
                        DispatchResult::AgentText(text) => {
                            history.push(Turn::assistant(text.clone()));
                            produced = Some(text);
                            SupervisorState::Routing
                        }
                        DispatchResult::Intercept(pending) => {
                            return Ok(TurnStep::Intercept(pending));
                        }
                    };
                }
            }
        }

        Ok(TurnStep::Reply(
            produced.unwrap_or_else(|| EMPTY_TURN_ACK.to_string()),
        ))
    }

    /// 派发到指定工人：带该工人的工具 schema 做一次抽参推理。
    /// 写操作不执行，原样上交；读操作立即执行
    async fn dispatch(
        &self,
        kind: HandlerKind,
        history: &History,
    ) -> Result<DispatchResult, BrainError> {
        let handler = self
            .handlers
            .get(kind)
            .ok_or_else(|| BrainError::Config(format!("no handler registered for {kind}")))?;

        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(Turn::system(handler.agent_prompt()));
        messages.extend_from_slice(history.turns());

        let spec = tool_spec(handler.as_ref());
        let reply = self
            .llm
            .complete_with_tools(&messages, std::slice::from_ref(&spec))
            .await
            .map_err(BrainError::Llm)?;

        match reply {
            LlmReply::Text(text) => Ok(DispatchResult::AgentText(text)),
            LlmReply::ToolCall { name, args } => {
                if name != handler.tool_name() {
                    // 幻觉工具名：折为失败文本回填路由循环
                    let outcome = HandlerOutcome::Failure(format!("Unknown tool: {name}"));
                    return Ok(DispatchResult::ToolResult(outcome.render()));
                }
                if handler.mutating() {
                    return Ok(DispatchResult::Intercept(PendingAction::new(
                        kind,
                        handler.tool_name(),
                        args,
                    )));
                }
                let outcome = self.execute(kind, args).await?;
                Ok(DispatchResult::ToolResult(outcome.render()))
            }
        }
    }

    /// 直接执行某个工人（确认闸放行后由外层调用，读操作派发也走这里）
    pub async fn execute(&self, kind: HandlerKind, args: Value) -> Result<HandlerOutcome, BrainError> {
        let handler = self
            .handlers
            .get(kind)
            .ok_or_else(|| BrainError::Config(format!("no handler registered for {kind}")))?;
        Ok(handler.invoke(args).await)
    }
}

/// 结果标记：Handler 结果文本的状态符号前缀
fn is_result_marker(content: &str) -> bool {
    content.starts_with('✅') || content.starts_with('❌')
}
