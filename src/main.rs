//! Krafix WhatsApp 服务
//!
//! 启动顺序：配置 → SQLite → 手册索引 → 大脑 → 会话管理器 → webhook 服务。
//!
//! 环境变量（KRAFIX__ 前缀可覆盖任意配置键）：
//! - OPENAI_API_KEY: LLM / 嵌入 / 转写共用的 API Key（本地 Ollama 可不设）
//! - KRAFIX__LLM__BASE_URL / KRAFIX__LLM__MODEL
//! - KRAFIX__WHATSAPP__SEND_URL 等：Twilio 出站配置
//!
//! 启动: cargo run --bin krafix-whatsapp

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use krafix::brain::Brain;
use krafix::channel::{serve, LogSender, OutboundSender, TwilioSender, WhatsappState};
use krafix::config::load_config;
use krafix::handlers::{
    HandlerRegistry, InventoryHandler, MaintenanceHandler, ProductionHandler,
};
use krafix::llm::{OpenAiClient, OpenAiEmbedder};
use krafix::manual::{ChunkingConfig, ManualIndex};
use krafix::session::{SessionManager, SessionSettings};
use krafix::store::Store;
use krafix::transcribe::WhisperTranscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with(fmt::layer())
        .init();

    let cfg = load_config(None)?;
    let api_key = std::env::var("OPENAI_API_KEY").ok();

    let store = Store::connect(&cfg.db.path).await?;
    tracing::info!(path = %cfg.db.path.display(), "database ready");

    let embedder = Arc::new(OpenAiEmbedder::new(
        cfg.llm.base_url.as_deref(),
        &cfg.llm.embedding_model,
        api_key.as_deref(),
        cfg.llm.request_timeout_secs,
    ));
    let mut index = ManualIndex::new(
        embedder,
        ChunkingConfig {
            chunk_size: cfg.manual.chunk_size,
            chunk_overlap: cfg.manual.chunk_overlap,
            ..Default::default()
        },
    );
    if let Some(ref dir) = cfg.manual.dir {
        match index.index_dir(dir).await {
            Ok(n) => tracing::info!(dir = %dir.display(), chunks = n, "manuals indexed"),
            Err(e) => tracing::warn!(dir = %dir.display(), error = %e, "manual indexing failed"),
        }
    } else {
        tracing::warn!("no manual dir configured, maintenance lookups will find nothing");
    }

    let mut registry = HandlerRegistry::new();
    registry.register(ProductionHandler::new(store.clone()));
    registry.register(InventoryHandler::new(store.clone()));
    registry.register(MaintenanceHandler::new(Arc::new(index), cfg.manual.top_k));

    let llm = Arc::new(OpenAiClient::new(
        cfg.llm.base_url.as_deref(),
        &cfg.llm.model,
        api_key.as_deref(),
        cfg.llm.request_timeout_secs,
    ));
    let brain = Arc::new(Brain::new(llm, Arc::new(registry), &cfg.app));

    let outbound: Arc<dyn OutboundSender> = match TwilioSender::from_config(&cfg.whatsapp) {
        Some(sender) => Arc::new(sender),
        None => {
            tracing::warn!("whatsapp outbound not configured, replies go to the log");
            Arc::new(LogSender)
        }
    };

    let sessions = Arc::new(SessionManager::new(
        brain,
        outbound.clone(),
        SessionSettings::from(&cfg.app),
    ));

    // 会话过期清理
    {
        let sessions = sessions.clone();
        let interval = Duration::from_secs(cfg.app.session_ttl_secs.max(60) / 4);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let reclaimed = sessions.cleanup_expired().await;
                if reclaimed > 0 {
                    tracing::info!(reclaimed, "expired sessions reclaimed");
                }
            }
        });
    }

    let base_url = cfg
        .llm
        .base_url
        .clone()
        .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
    let transcriber = Arc::new(WhisperTranscriber::new(
        base_url,
        api_key,
        &cfg.llm.transcribe_model,
    ));

    let media_auth = match (&cfg.whatsapp.account_sid, &cfg.whatsapp.auth_token) {
        (Some(sid), Some(token)) => Some((sid.clone(), token.clone())),
        _ => None,
    };

    let state = Arc::new(WhatsappState {
        sessions,
        transcriber,
        outbound,
        http: reqwest::Client::new(),
        media_auth,
    });

    serve(state, cfg.whatsapp.port).await
}
