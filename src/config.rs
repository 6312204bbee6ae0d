//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `KRAFIX__*` 覆盖（双下划线表示嵌套，
//! 如 `KRAFIX__LLM__MODEL=llama3.2`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::router::confirm::UnrecognizedReplyPolicy;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub db: DbSection,
    #[serde(default)]
    pub manual: ManualSection,
    #[serde(default)]
    pub whatsapp: WhatsappSection,
}

/// [app] 段：会话窗口、各类 TTL 与确认策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 对话历史保留轮数（短期记忆）
    pub max_context_turns: usize,
    /// 会话过期时间（秒），到期后由清理任务回收
    pub session_ttl_secs: u64,
    /// 待确认动作的有效期（秒），过期后视为不存在
    pub pending_ttl_secs: u64,
    /// 单轮处理上限（秒），超时则回复固定的兜底消息
    pub turn_deadline_secs: u64,
    /// 一轮内监督者最多路由几次（防止无限循环）
    pub max_route_passes: usize,
    /// 待确认动作收到既非肯定也非否定的回复时的策略
    pub on_unrecognized_reply: UnrecognizedReplyPolicy,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            max_context_turns: 20,
            session_ttl_secs: 3600,
            pending_ttl_secs: 600,
            turn_deadline_secs: 120,
            max_route_passes: 4,
            on_unrecognized_reply: UnrecognizedReplyPolicy::RepromptOnce,
        }
    }
}

/// [llm] 段：OpenAI 兼容端点（Ollama 需 /v1 后缀）与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub base_url: Option<String>,
    pub model: String,
    pub embedding_model: String,
    /// 单次推理调用超时（秒）
    pub request_timeout_secs: u64,
    /// 语音转写模型
    pub transcribe_model: String,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: Some("http://localhost:11434/v1".to_string()),
            model: "llama3.2".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            request_timeout_secs: 60,
            transcribe_model: "whisper-1".to_string(),
        }
    }
}

/// [db] 段：SQLite 文件路径
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DbSection {
    pub path: PathBuf,
}

impl Default for DbSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("krafix.db"),
        }
    }
}

/// [manual] 段：维修手册目录与检索参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ManualSection {
    /// 手册文本文件所在目录（启动时全部索引）
    pub dir: Option<PathBuf>,
    /// 分块目标大小（字符数）
    pub chunk_size: usize,
    /// 块间重叠（字符数）
    pub chunk_overlap: usize,
    /// 检索返回的段落数
    pub top_k: usize,
}

impl Default for ManualSection {
    fn default() -> Self {
        Self {
            dir: None,
            chunk_size: 500,
            chunk_overlap: 50,
            top_k: 3,
        }
    }
}

/// [whatsapp] 段：监听端口与出站发送端点（Twilio 风格异步回信）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WhatsappSection {
    /// 监听端口
    pub port: u16,
    /// 出站消息 API，如 https://api.twilio.com/2010-04-01/Accounts/SID/Messages.json
    pub send_url: Option<String>,
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    /// 出站 From 号码（"whatsapp:+14155238886" 形式）
    pub from_number: Option<String>,
}

impl Default for WhatsappSection {
    fn default() -> Self {
        Self {
            port: 8000,
            send_url: None,
            account_sid: None,
            auth_token: None,
            from_number: None,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            llm: LlmSection::default(),
            db: DbSection::default(),
            manual: ManualSection::default(),
            whatsapp: WhatsappSection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 KRAFIX__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 KRAFIX__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("KRAFIX")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.app.max_context_turns, 20);
        assert_eq!(cfg.app.pending_ttl_secs, 600);
        assert_eq!(cfg.manual.top_k, 3);
        assert!(matches!(
            cfg.app.on_unrecognized_reply,
            UnrecognizedReplyPolicy::RepromptOnce
        ));
    }
}
