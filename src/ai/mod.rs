//! AI 集成 - 分类/回复远端能力

pub mod client;
pub mod scripted;
pub mod types;

use async_trait::async_trait;

use crate::error::ProviderError;

pub use client::ChatClient;
pub use scripted::ScriptedProvider;
pub use types::{ChatMessage, Completion, Role, TokenUsage};

/// 远端分类/回复能力
///
/// 输入按顺序的带角色消息，返回生成文本与 token 用量。
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<Completion, ProviderError>;
}
