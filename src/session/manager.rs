//! 会话管理器：每个发送者一个串行工人
//!
//! 同一发送者的消息严格串行处理（一个 mpsc 队列 + 单任务消费），不同发送者并行。
//! 顶替语义：新消息入队时撤销同发送者尚未完成的上一条（被顶替的那轮不发回信，
//! 队头永远是最新消息）。每轮有处理期限，超时发一条固定的兜底回执。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::brain::{Brain, APOLOGY};
use crate::channel::OutboundSender;
use crate::config::AppSection;
use crate::session::Session;

/// 单轮超时的兜底回执
pub const DEADLINE_NOTICE: &str = "⏳ Sorry, that took too long. Please try again.";

const QUEUE_DEPTH: usize = 16;

/// 会话层参数（从 [app] 段取）
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub max_context_turns: usize,
    pub session_ttl_secs: u64,
    pub turn_deadline_secs: u64,
}

impl From<&AppSection> for SessionSettings {
    fn from(app: &AppSection) -> Self {
        Self {
            max_context_turns: app.max_context_turns,
            session_ttl_secs: app.session_ttl_secs,
            turn_deadline_secs: app.turn_deadline_secs,
        }
    }
}

struct Job {
    text: String,
    cancel: CancellationToken,
}

struct Worker {
    tx: mpsc::Sender<Job>,
    /// 最近一条消息的撤销令牌（顶替时取消）
    current: CancellationToken,
    last_active: DateTime<Utc>,
    task: JoinHandle<()>,
}

/// 会话管理器
pub struct SessionManager {
    brain: Arc<Brain>,
    outbound: Arc<dyn OutboundSender>,
    settings: SessionSettings,
    workers: Mutex<HashMap<String, Worker>>,
}

impl SessionManager {
    pub fn new(
        brain: Arc<Brain>,
        outbound: Arc<dyn OutboundSender>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            brain,
            outbound,
            settings,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// 入队一条入站消息。同发送者排队或在处理中的上一条立即被顶替
    pub async fn enqueue(&self, sender: &str, text: String) {
        // 不持锁跨越队列写入：克隆 Sender 后立刻放锁
        let (tx, token) = {
            let mut workers = self.workers.lock().await;

            let needs_spawn = match workers.get(sender) {
                Some(w) => w.tx.is_closed(),
                None => true,
            };
            if needs_spawn {
                workers.insert(sender.to_string(), self.spawn_worker(sender));
            }

            // unwrap 安全：上面刚确保了条目存在
            let worker = workers.get_mut(sender).unwrap();
            worker.current.cancel();
            let token = CancellationToken::new();
            worker.current = token.clone();
            worker.last_active = Utc::now();
            (worker.tx.clone(), token)
        };

        if tx
            .send(Job {
                text,
                cancel: token,
            })
            .await
            .is_err()
        {
            tracing::error!(sender, "worker queue closed, message dropped");
        }
    }

    /// 回收闲置超过 session_ttl 的会话，返回回收数量
    pub async fn cleanup_expired(&self) -> usize {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.settings.session_ttl_secs as i64);
        let mut workers = self.workers.lock().await;
        let before = workers.len();
        workers.retain(|sender, w| {
            if w.last_active < cutoff {
                tracing::info!(sender, "session expired, reclaiming worker");
                w.task.abort();
                false
            } else {
                true
            }
        });
        before - workers.len()
    }

    pub async fn session_count(&self) -> usize {
        self.workers.lock().await.len()
    }

    fn spawn_worker(&self, sender: &str) -> Worker {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let task = tokio::spawn(run_worker(
            sender.to_string(),
            rx,
            self.brain.clone(),
            self.outbound.clone(),
            self.settings.clone(),
        ));
        Worker {
            tx,
            current: CancellationToken::new(),
            last_active: Utc::now(),
            task,
        }
    }
}

/// 工人主循环：逐条消费，会话状态只在此任务内可变
async fn run_worker(
    sender: String,
    mut rx: mpsc::Receiver<Job>,
    brain: Arc<Brain>,
    outbound: Arc<dyn OutboundSender>,
    settings: SessionSettings,
) {
    let deadline = Duration::from_secs(settings.turn_deadline_secs);
    let mut session = Session::new(&sender, settings.max_context_turns);

    while let Some(job) = rx.recv().await {
        // 排队期间已被顶替：静默跳过
        if job.cancel.is_cancelled() {
            tracing::debug!(sender, "superseded in queue, skipping");
            continue;
        }

        let reply = tokio::select! {
            _ = job.cancel.cancelled() => {
                tracing::debug!(sender, "superseded mid-turn, dropping reply");
                None
            }
            res = tokio::time::timeout(deadline, brain.handle_message(&mut session, &job.text)) => {
                Some(match res {
                    Ok(Ok(reply)) => reply,
                    Ok(Err(e)) => {
                        tracing::error!(sender, error = %e, "turn failed");
                        APOLOGY.to_string()
                    }
                    Err(_) => {
                        tracing::warn!(sender, deadline_secs = settings.turn_deadline_secs, "turn deadline exceeded");
                        DEADLINE_NOTICE.to_string()
                    }
                })
            }
        };

        if let Some(body) = reply {
            if let Err(e) = outbound.send(&sender, &body).await {
                tracing::error!(sender, error = %e, "outbound send failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use serde_json::json;

    use crate::config::AppConfig;
    use crate::handlers::{HandlerRegistry, InventoryHandler, ProductionHandler};
    use crate::llm::mock::ScriptedLlm;
    use crate::store::Store;

    /// 收集出站消息的假发送端
    #[derive(Default)]
    struct CollectingSink {
        sent: StdMutex<Vec<(String, String)>>,
    }

    impl CollectingSink {
        fn snapshot(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl OutboundSender for CollectingSink {
        async fn send(&self, to: &str, body: &str) -> Result<(), String> {
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), body.to_string()));
            Ok(())
        }
    }

    async fn manager(llm: Arc<ScriptedLlm>) -> (SessionManager, Arc<CollectingSink>) {
        let store = Store::in_memory().await.unwrap();
        let mut reg = HandlerRegistry::new();
        reg.register(ProductionHandler::new(store.clone()));
        reg.register(InventoryHandler::new(store));
        let cfg = AppConfig::default();
        let brain = Arc::new(Brain::new(llm, Arc::new(reg), &cfg.app));
        let sink = Arc::new(CollectingSink::default());
        let settings = SessionSettings::from(&cfg.app);
        (SessionManager::new(brain, sink.clone(), settings), sink)
    }

    async fn wait_for_sent(sink: &CollectingSink, count: usize) {
        for _ in 0..200 {
            if sink.snapshot().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("outbound messages never arrived");
    }

    #[tokio::test]
    async fn reply_is_delivered_to_sender() {
        let llm = Arc::new(ScriptedLlm::default());
        llm.push_text("Hello from the factory.");
        let (mgr, sink) = manager(llm).await;

        mgr.enqueue("whatsapp:+1555", "hi".to_string()).await;
        wait_for_sent(&sink, 1).await;

        let sent = sink.snapshot();
        assert_eq!(sent[0].0, "whatsapp:+1555");
        assert_eq!(sent[0].1, "Hello from the factory.");
    }

    #[tokio::test]
    async fn same_sender_messages_are_serialized_in_order() {
        let llm = Arc::new(ScriptedLlm::default());
        llm.push_text("production_agent");
        llm.push_tool_call("log_production", json!({ "machine_id": "M1", "rolls": 50 }));
        let (mgr, sink) = manager(llm.clone()).await;

        mgr.enqueue("whatsapp:+1555", "log 50 rolls for M1".to_string())
            .await;
        wait_for_sent(&sink, 1).await;
        // 确认提示到达后再回 yes，保证不触发顶替
        mgr.enqueue("whatsapp:+1555", "yes".to_string()).await;
        wait_for_sent(&sink, 2).await;

        let sent = sink.snapshot();
        assert!(sent[0].1.starts_with("✋ WAIT."));
        assert!(sent[1].1.starts_with("✅ Success."));
    }

    #[tokio::test]
    async fn distinct_senders_get_distinct_sessions() {
        let llm = Arc::new(ScriptedLlm::default());
        llm.push_text("Reply one.");
        llm.push_text("Reply two.");
        let (mgr, sink) = manager(llm).await;

        mgr.enqueue("whatsapp:+1111", "hi".to_string()).await;
        wait_for_sent(&sink, 1).await;
        mgr.enqueue("whatsapp:+2222", "hi".to_string()).await;
        wait_for_sent(&sink, 2).await;

        assert_eq!(mgr.session_count().await, 2);
    }

    /// 最新用户消息含 "slow" 时长时间挂起，否则立即回文本
    struct GatedLlm;

    #[async_trait]
    impl crate::llm::LlmClient for GatedLlm {
        async fn complete(
            &self,
            messages: &[crate::session::Turn],
        ) -> Result<String, String> {
            let slow = messages
                .iter()
                .rev()
                .find(|t| t.role == crate::session::Role::User)
                .map(|t| t.content.contains("slow"))
                .unwrap_or(false);
            if slow {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Ok("pong".to_string())
        }

        async fn complete_with_tools(
            &self,
            _messages: &[crate::session::Turn],
            _tools: &[crate::llm::ToolSpec],
        ) -> Result<crate::llm::LlmReply, String> {
            Err("not scripted".to_string())
        }
    }

    #[tokio::test]
    async fn slow_turn_on_one_sender_does_not_block_another() {
        let store = Store::in_memory().await.unwrap();
        let mut reg = HandlerRegistry::new();
        reg.register(ProductionHandler::new(store));
        let cfg = AppConfig::default();
        let brain = Arc::new(Brain::new(Arc::new(GatedLlm), Arc::new(reg), &cfg.app));
        let sink = Arc::new(CollectingSink::default());
        let mgr = SessionManager::new(brain, sink.clone(), SessionSettings::from(&cfg.app));

        mgr.enqueue("whatsapp:+1111", "slow ping".to_string()).await;
        // 第一个发送者的轮次还在挂起，第二个发送者必须照常得到回复
        mgr.enqueue("whatsapp:+2222", "ping".to_string()).await;
        wait_for_sent(&sink, 1).await;

        let sent = sink.snapshot();
        assert_eq!(sent[0].0, "whatsapp:+2222");
        assert_eq!(sent[0].1, "pong");
    }

    #[tokio::test]
    async fn idle_sessions_are_reclaimed() {
        let llm = Arc::new(ScriptedLlm::default());
        llm.push_text("Hi.");
        let (mut mgr, sink) = manager(llm).await;
        mgr.settings.session_ttl_secs = 0;

        mgr.enqueue("whatsapp:+1555", "hi".to_string()).await;
        wait_for_sent(&sink, 1).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(mgr.cleanup_expired().await, 1);
        assert_eq!(mgr.session_count().await, 0);
    }
}
