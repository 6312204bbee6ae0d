//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；
//! Ollama 需要 /v1 后缀。每次调用带 tokio::time::timeout，超时按错误处理而非挂起。

use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionMessageToolCalls, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionTool, ChatCompletionTools,
    CreateChatCompletionRequestArgs, FunctionObjectArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::llm::{LlmClient, LlmReply, ToolSpec};
use crate::session::{Role, Turn};

/// OpenAI 兼容客户端：持有 Client 与 model 名
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    request_timeout: Duration,
}

impl OpenAiClient {
    pub fn new(
        base_url: Option<&str>,
        model: &str,
        api_key: Option<&str>,
        request_timeout_secs: u64,
    ) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            request_timeout: Duration::from_secs(request_timeout_secs),
        }
    }

    fn to_openai_messages(&self, turns: &[Turn]) -> Vec<ChatCompletionRequestMessage> {
        turns
            .iter()
            .map(|t| match t.role {
                Role::System => ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessageArgs::default()
                        .content(t.content.clone())
                        .build()
                        .unwrap(),
                ),
                Role::User => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(t.content.clone())
                        .build()
                        .unwrap(),
                ),
                // Tool 结果没有配对的 tool_call_id（结果文本即对话内容），按 Assistant 注入
                Role::Assistant | Role::Tool => ChatCompletionRequestMessage::Assistant(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .content(t.content.clone())
                        .build()
                        .unwrap(),
                ),
            })
            .collect()
    }

    fn to_openai_tools(&self, tools: &[ToolSpec]) -> Result<Vec<ChatCompletionTools>, String> {
        tools
            .iter()
            .map(|t| {
                let function = FunctionObjectArgs::default()
                    .name(t.name.clone())
                    .description(t.description.clone())
                    .parameters(t.parameters.clone())
                    .build()
                    .map_err(|e| e.to_string())?;
                Ok(ChatCompletionTools::Function(ChatCompletionTool {
                    function,
                }))
            })
            .collect()
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, messages: &[Turn]) -> Result<String, String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.to_openai_messages(messages))
            .build()
            .map_err(|e| e.to_string())?;

        let response = tokio::time::timeout(self.request_timeout, self.client.chat().create(request))
            .await
            .map_err(|_| "LLM request timed out".to_string())?
            .map_err(|e| e.to_string())?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(content)
    }

    async fn complete_with_tools(
        &self,
        messages: &[Turn],
        tools: &[ToolSpec],
    ) -> Result<LlmReply, String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.to_openai_messages(messages))
            .tools(self.to_openai_tools(tools)?)
            .build()
            .map_err(|e| e.to_string())?;

        let response = tokio::time::timeout(self.request_timeout, self.client.chat().create(request))
            .await
            .map_err(|_| "LLM request timed out".to_string())?
            .map_err(|e| e.to_string())?;

        let message = response
            .choices
            .first()
            .map(|c| c.message.clone())
            .ok_or_else(|| "empty choices".to_string())?;

        let function_call = message.tool_calls.as_ref().and_then(|calls| {
            calls.iter().find_map(|c| match c {
                ChatCompletionMessageToolCalls::Function(call) => Some(call),
                _ => None,
            })
        });
        if let Some(call) = function_call {
            let args: serde_json::Value = serde_json::from_str(&call.function.arguments)
                .map_err(|e| format!("bad tool arguments: {e}"))?;
            return Ok(LlmReply::ToolCall {
                name: call.function.name.clone(),
                args,
            });
        }

        Ok(LlmReply::Text(message.content.unwrap_or_default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> OpenAiClient {
        OpenAiClient::new(Some("http://127.0.0.1:1/v1"), "llama3.2", Some("sk-test"), 1)
    }

    #[test]
    fn tool_spec_maps_to_function_tool() {
        let spec = ToolSpec {
            name: "update_stock".to_string(),
            description: "Update inventory.".to_string(),
            parameters: json!({ "type": "object", "properties": {} }),
        };
        let tools = client().to_openai_tools(std::slice::from_ref(&spec)).unwrap();
        assert_eq!(tools.len(), 1);
        match &tools[0] {
            ChatCompletionTools::Function(tool) => {
                assert_eq!(tool.function.name, "update_stock");
            }
            #[allow(unreachable_patterns)]
            other => panic!("expected function tool, got {other:?}"),
        }
    }

    #[test]
    fn tool_results_are_injected_as_assistant_messages() {
        let turns = [
            Turn::system("route"),
            Turn::user("add 5 glue"),
            Turn::tool("✅ Stock Updated. Glue: 5", crate::handlers::HandlerKind::Inventory),
        ];
        let messages = client().to_openai_messages(&turns);
        assert_eq!(messages.len(), 3);
        assert!(matches!(
            messages[2],
            ChatCompletionRequestMessage::Assistant(_)
        ));
    }
}
