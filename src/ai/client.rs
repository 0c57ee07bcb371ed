//! Chat Completions API 客户端
//!
//! OpenAI 兼容接口（默认 DeepSeek），分类与回复共用同一个客户端。
//! 只负责一次请求/响应，重试与计费由调用方处理。

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::types::{ChatMessage, Completion, TokenUsage};
use super::ChatProvider;
use crate::config::TriageConfig;
use crate::error::ProviderError;

/// 默认 API 地址
pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com";

/// 默认模型
pub const DEFAULT_MODEL: &str = "deepseek-chat";

/// 默认超时（毫秒）
pub const DEFAULT_TIMEOUT_MS: u64 = 60000;

const COMPLETIONS_PATH: &str = "/chat/completions";

/// Chat Completions 请求体
#[derive(Serialize)]
pub(crate) struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub stream: bool,
}

/// Chat Completions 响应体
#[derive(Deserialize)]
pub(crate) struct ChatResponse {
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<UsageBody>,
}

#[derive(Deserialize)]
pub(crate) struct Choice {
    pub message: ChoiceMessage,
}

#[derive(Deserialize)]
pub(crate) struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct UsageBody {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

/// API 错误响应
#[derive(Deserialize)]
pub(crate) struct ErrorResponse {
    pub error: ApiError,
}

#[derive(Deserialize)]
pub(crate) struct ApiError {
    pub message: String,
}

/// 补全 base_url，确保以 /chat/completions 结尾
pub fn completions_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with(COMPLETIONS_PATH) {
        base.to_string()
    } else {
        format!("{}{}", base, COMPLETIONS_PATH)
    }
}

/// 解析响应体；status 非 2xx 时尝试读出错误信息
pub(crate) fn parse_response(status: u16, body: &str) -> Result<Completion, ProviderError> {
    if !(200..300).contains(&status) {
        if let Ok(error_resp) = serde_json::from_str::<ErrorResponse>(body) {
            return Err(ProviderError::Api {
                status,
                message: error_resp.error.message,
            });
        }
        return Err(ProviderError::Api {
            status,
            message: body.to_string(),
        });
    }

    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::Parse(format!("{} - body: {}", e, body)))?;

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or(ProviderError::EmptyChoices)?;

    let content = choice.message.content.unwrap_or_default();
    if content.is_empty() {
        warn!("Empty content in chat completion response");
    }

    let usage = response
        .usage
        .map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    Ok(Completion { content, usage })
}

/// Chat Completions 客户端
pub struct ChatClient {
    client: Client,
    url: String,
    api_key: String,
    model: String,
}

impl ChatClient {
    /// 创建新客户端
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout_ms: u64,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| anyhow::anyhow!("Cannot create HTTP client: {}", e))?;

        Ok(Self {
            client,
            url: completions_url(base_url),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    /// 从配置创建客户端
    pub fn from_config(config: &TriageConfig) -> anyhow::Result<Self> {
        if config.api_key.is_empty() {
            warn!("No API key configured; remote calls will be rejected by the endpoint");
        }
        Self::new(&config.base_url, &config.api_key, &config.model, config.timeout_ms)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ChatProvider for ChatClient {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<Completion, ProviderError> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            stream: false,
        };

        debug!(
            model = %self.model,
            messages = messages.len(),
            url = %self.url,
            "Sending chat completion request"
        );

        let start = std::time::Instant::now();
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                ProviderError::Request(format!(
                    "after {}ms: {}",
                    start.elapsed().as_millis(),
                    e
                ))
            })?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!(elapsed_ms = start.elapsed().as_millis(), status, "Chat completion finished");

        parse_response(status, &body)
    }
}
