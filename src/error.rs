//! 错误类型
//!
//! Handler 内部的存储/检索错误不在此列：按约定在 Handler 边界转为 Failure 文本，
//! 折回路由循环。语音转写失败在通道层就地处理（道歉并丢弃本轮）。
//! 这里只保留必须中止当前轮的错误。

use thiserror::Error;

/// 工厂大脑运行过程中必须中止当前轮的错误
#[derive(Error, Debug)]
pub enum BrainError {
    /// 意图分类的推理调用失败（网络 / 超时 / 后端错误）。
    /// 安全约束：此时绝不猜测路由，直接终止本轮并回复道歉
    #[error("Classifier failure: {0}")]
    Classifier(String),

    /// 派发后的抽参推理调用失败
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Config error: {0}")]
    Config(String),
}
