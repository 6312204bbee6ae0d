//! 语音转写：OpenAI 兼容的 /audio/transcriptions 端点（Whisper）
//!
//! WhatsApp 语音消息是 OGG/Opus；转写失败时整轮作废并道歉，
//! 绝不把空文本或猜测的文本送进路由。

use async_trait::async_trait;
use reqwest::multipart;

/// Whisper 单文件上限（25 MB）
const MAX_AUDIO_BYTES: usize = 25 * 1024 * 1024;

/// 语音转写端
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// 音频字节 + MIME 类型 → 文本
    async fn transcribe(&self, audio: &[u8], content_type: &str) -> Result<String, String>;
}

/// 经 OpenAI 兼容端点的 Whisper 转写
pub struct WhisperTranscriber {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl WhisperTranscriber {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio: &[u8], content_type: &str) -> Result<String, String> {
        if audio.len() > MAX_AUDIO_BYTES {
            return Err(format!(
                "audio too large: {} bytes (max {})",
                audio.len(),
                MAX_AUDIO_BYTES
            ));
        }

        let filename = format!("voice.{}", extension_for(content_type));
        let file_part = multipart::Part::bytes(audio.to_vec())
            .file_name(filename)
            .mime_str(content_type)
            .map_err(|e| format!("bad content type: {e}"))?;

        let form = multipart::Form::new()
            .part("file", file_part)
            .text("model", self.model.clone())
            .text("response_format", "text");

        let url = format!(
            "{}/audio/transcriptions",
            self.base_url.trim_end_matches('/')
        );
        let mut request = self.client.post(&url).multipart(form);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| format!("transcription request failed: {e}"))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| format!("transcription response unreadable: {e}"))?;

        if !status.is_success() {
            return Err(format!("transcription HTTP {status}: {body}"));
        }

        Ok(body.trim().to_string())
    }
}

/// MIME 类型 → 文件后缀；WhatsApp 语音默认 OGG/Opus
fn extension_for(content_type: &str) -> &'static str {
    match content_type.split(';').next().unwrap_or("").trim() {
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/wav" | "audio/x-wav" => "wav",
        "audio/webm" => "webm",
        "audio/mp4" | "audio/m4a" => "m4a",
        _ => "ogg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_maps_to_extension() {
        assert_eq!(extension_for("audio/ogg"), "ogg");
        assert_eq!(extension_for("audio/ogg; codecs=opus"), "ogg");
        assert_eq!(extension_for("audio/mpeg"), "mp3");
        assert_eq!(extension_for("application/octet-stream"), "ogg");
    }

    #[tokio::test]
    async fn oversized_audio_is_rejected_before_upload() {
        let t = WhisperTranscriber::new("http://127.0.0.1:1/v1", None, "whisper-1");
        let audio = vec![0u8; MAX_AUDIO_BYTES + 1];
        let err = t.transcribe(&audio, "audio/ogg").await.unwrap_err();
        assert!(err.contains("too large"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_an_error() {
        let t = WhisperTranscriber::new("http://127.0.0.1:1/v1", None, "whisper-1");
        let err = t.transcribe(&[0u8; 16], "audio/ogg").await.unwrap_err();
        assert!(err.contains("request failed"));
    }
}
