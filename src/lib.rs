//! Krafix - 工厂大脑（WhatsApp 对话式工厂助手）
//!
//! 模块划分：
//! - **brain**: 单条消息的处理管线（确认闸 → 监督者）
//! - **channel**: WhatsApp webhook 入站与 Twilio 风格出站
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **handlers**: 三个任务工人（生产记录 / 库存调整 / 维修手册）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）与嵌入
//! - **manual**: 维修手册分块、向量索引与检索
//! - **router**: 意图分类器、监督者状态机、写操作确认闸
//! - **session**: 每发送者的会话状态与串行工人
//! - **store**: SQLite 持久化（生产记录、库存）
//! - **transcribe**: 语音消息转写（Whisper 兼容端点）

pub mod brain;
pub mod channel;
pub mod config;
pub mod error;
pub mod handlers;
pub mod llm;
pub mod manual;
pub mod router;
pub mod session;
pub mod store;
pub mod transcribe;

pub use brain::Brain;
pub use error::BrainError;
