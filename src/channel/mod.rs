//! 通讯通道：WhatsApp webhook 入站 + Twilio 风格出站

pub mod whatsapp;

use async_trait::async_trait;

pub use whatsapp::{create_router, serve, LogSender, TwilioSender, WhatsappState, AUDIO_APOLOGY};

/// 出站发送端。回信是异步的：webhook 先空应答，处理完后经此发出
#[async_trait]
pub trait OutboundSender: Send + Sync {
    async fn send(&self, to: &str, body: &str) -> Result<(), String>;
}
