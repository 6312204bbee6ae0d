//! LLM 客户端抽象与实现（OpenAI 兼容 / Mock）

pub mod embedding;
pub mod mock;
pub mod openai;
pub mod traits;

pub use embedding::{EmbeddingProvider, OpenAiEmbedder};
pub use mock::ScriptedLlm;
pub use openai::OpenAiClient;
pub use traits::{LlmClient, LlmReply, ToolSpec};
