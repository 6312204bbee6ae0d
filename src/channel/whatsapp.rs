//! WhatsApp 集成（Twilio Sandbox 风格）
//!
//! Webhook 收到表单后立即返回空 TwiML（回信走异步出站 API，不占用 webhook 应答），
//! 媒体下载、语音转写与排队都在后台任务里做。
//! 语音转写失败时本轮作废，直接道歉，不把空文本送进路由。

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Form, Router,
};
use async_trait::async_trait;
use serde::Deserialize;

use crate::channel::OutboundSender;
use crate::config::WhatsappSection;
use crate::session::SessionManager;
use crate::transcribe::Transcriber;

/// 空 TwiML 应答：确认收到，不在 webhook 里回信
const EMPTY_TWIML: &str = r#"<?xml version="1.0" encoding="UTF-8"?><Response></Response>"#;

/// 语音转写失败时的道歉
pub const AUDIO_APOLOGY: &str = "😵 Sorry, I couldn't understand the audio. Please try again.";

/// 单条出站消息的字符上限（Twilio 限 1600，留余量）
const MAX_OUTBOUND_CHARS: usize = 1500;

/// WhatsApp 服务状态
pub struct WhatsappState {
    pub sessions: Arc<SessionManager>,
    pub transcriber: Arc<dyn Transcriber>,
    pub outbound: Arc<dyn OutboundSender>,
    pub http: reqwest::Client,
    /// 媒体下载用的认证（Twilio 媒体 URL 需要 Basic Auth）
    pub media_auth: Option<(String, String)>,
}

/// Twilio 入站表单（只取用到的字段）
#[derive(Debug, Deserialize)]
pub struct InboundForm {
    #[serde(rename = "From")]
    pub from: String,
    #[serde(rename = "Body", default)]
    pub body: Option<String>,
    #[serde(rename = "MediaUrl0", default)]
    pub media_url: Option<String>,
    #[serde(rename = "MediaContentType0", default)]
    pub media_content_type: Option<String>,
}

/// 创建 WhatsApp 路由
pub fn create_router(state: Arc<WhatsappState>) -> Router {
    Router::new()
        .route("/whatsapp", post(webhook_receive))
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
}

/// 启动 HTTP 服务
pub async fn serve(state: Arc<WhatsappState>, port: u16) -> anyhow::Result<()> {
    let app = create_router(state);
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "whatsapp webhook listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// POST /whatsapp - 接收消息，立即空应答
async fn webhook_receive(
    State(state): State<Arc<WhatsappState>>,
    Form(form): Form<InboundForm>,
) -> impl IntoResponse {
    tokio::spawn(handle_inbound(state, form));
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/xml")],
        EMPTY_TWIML,
    )
}

/// 后台处理一条入站消息：语音先转写，文本直接入队
async fn handle_inbound(state: Arc<WhatsappState>, form: InboundForm) {
    let sender = form.from;

    let text = match (form.media_url, form.media_content_type) {
        (Some(url), Some(ct)) if is_audio(&ct) => {
            match fetch_and_transcribe(&state, &url, &ct).await {
                Ok(t) if !t.trim().is_empty() => t,
                Ok(_) => {
                    tracing::warn!(sender, "empty transcription, dropping turn");
                    let _ = state.outbound.send(&sender, AUDIO_APOLOGY).await;
                    return;
                }
                Err(e) => {
                    tracing::error!(sender, error = %e, "transcription failed");
                    let _ = state.outbound.send(&sender, AUDIO_APOLOGY).await;
                    return;
                }
            }
        }
        _ => match form.body {
            Some(body) if !body.trim().is_empty() => body,
            _ => {
                tracing::debug!(sender, "empty message ignored");
                return;
            }
        },
    };

    state.sessions.enqueue(&sender, text).await;
}

/// 下载媒体并转写
async fn fetch_and_transcribe(
    state: &WhatsappState,
    url: &str,
    content_type: &str,
) -> Result<String, String> {
    let mut request = state.http.get(url);
    if let Some((sid, token)) = &state.media_auth {
        request = request.basic_auth(sid, Some(token));
    }
    let response = request
        .send()
        .await
        .map_err(|e| format!("media fetch failed: {e}"))?;
    if !response.status().is_success() {
        return Err(format!("media fetch HTTP {}", response.status()));
    }
    let audio = response
        .bytes()
        .await
        .map_err(|e| format!("media body unreadable: {e}"))?;

    state.transcriber.transcribe(&audio, content_type).await
}

fn is_audio(content_type: &str) -> bool {
    content_type.trim().starts_with("audio/")
}

/// Twilio 风格出站发送端：POST send_url，Basic Auth，表单编码
pub struct TwilioSender {
    client: reqwest::Client,
    send_url: String,
    account_sid: String,
    auth_token: String,
    from_number: String,
}

impl TwilioSender {
    /// 配置齐全时构造；缺任一项返回 None（此时用 LogSender 兜底）
    pub fn from_config(cfg: &WhatsappSection) -> Option<Self> {
        Some(Self {
            client: reqwest::Client::new(),
            send_url: cfg.send_url.clone()?,
            account_sid: cfg.account_sid.clone()?,
            auth_token: cfg.auth_token.clone()?,
            from_number: cfg.from_number.clone()?,
        })
    }
}

#[async_trait]
impl OutboundSender for TwilioSender {
    async fn send(&self, to: &str, body: &str) -> Result<(), String> {
        for chunk in split_chunks(body, MAX_OUTBOUND_CHARS) {
            let params = [
                ("To", to),
                ("From", self.from_number.as_str()),
                ("Body", chunk.as_str()),
            ];
            let response = self
                .client
                .post(&self.send_url)
                .basic_auth(&self.account_sid, Some(&self.auth_token))
                .form(&params)
                .send()
                .await
                .map_err(|e| format!("send failed: {e}"))?;

            if !response.status().is_success() {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                return Err(format!("send HTTP {status}: {text}"));
            }
        }
        Ok(())
    }
}

/// 无出站配置时的兜底：把回信写进日志（本地调试用）
pub struct LogSender;

#[async_trait]
impl OutboundSender for LogSender {
    async fn send(&self, to: &str, body: &str) -> Result<(), String> {
        tracing::info!(to, body, "outbound (log only)");
        Ok(())
    }
}

/// 按字符数分段（消息长度上限按字符算，不按字节）
fn split_chunks(body: &str, max_chars: usize) -> Vec<String> {
    if body.chars().count() <= max_chars {
        return vec![body.to_string()];
    }
    body.chars()
        .collect::<Vec<_>>()
        .chunks(max_chars)
        .map(|c| c.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_detection_by_content_type() {
        assert!(is_audio("audio/ogg"));
        assert!(is_audio("audio/mpeg"));
        assert!(!is_audio("image/jpeg"));
        assert!(!is_audio(""));
    }

    #[test]
    fn short_message_is_single_chunk() {
        assert_eq!(split_chunks("hello", 10), vec!["hello".to_string()]);
    }

    #[test]
    fn long_message_splits_on_char_boundary() {
        let body = "好".repeat(25);
        let chunks = split_chunks(&body, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 10);
        assert_eq!(chunks[2].chars().count(), 5);
    }

    #[test]
    fn sender_requires_full_config() {
        let cfg = WhatsappSection::default();
        assert!(TwilioSender::from_config(&cfg).is_none());
    }
}
