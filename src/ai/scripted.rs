//! 脚本化 Provider - 按预设顺序返回结果，记录每次请求
//!
//! 用于测试和离线演示，行为完全确定。

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use super::types::{ChatMessage, Completion};
use super::ChatProvider;
use crate::error::ProviderError;

/// 按队列顺序应答的 Provider
#[derive(Default)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<Completion, ProviderError>>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个成功回复
    pub fn reply(self, content: &str, prompt_tokens: u64, completion_tokens: u64) -> Self {
        lock(&self.replies).push_back(Ok(Completion::new(content, prompt_tokens, completion_tokens)));
        self
    }

    /// 追加一次调用失败
    pub fn fail(self, error: ProviderError) -> Self {
        lock(&self.replies).push_back(Err(error));
        self
    }

    /// 已收到的请求数
    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }

    /// 已收到的请求（按调用顺序）
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        lock(&self.requests).clone()
    }

    /// 剩余未消费的回复数
    pub fn remaining(&self) -> usize {
        lock(&self.replies).len()
    }
}

// 中毒的锁仍然可用：数据只是队列和日志
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<Completion, ProviderError> {
        lock(&self.requests).push(messages.to_vec());
        lock(&self.replies)
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Request("script exhausted".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replies_in_order_and_records_requests() {
        let provider = ScriptedProvider::new()
            .reply("first", 1, 1)
            .fail(ProviderError::EmptyChoices);

        let msgs = vec![ChatMessage::user("hello")];
        let first = provider.chat(&msgs).await.unwrap();
        assert_eq!(first.content, "first");
        assert!(provider.chat(&msgs).await.is_err());
        assert!(matches!(
            provider.chat(&msgs).await,
            Err(ProviderError::Request(_))
        ));

        assert_eq!(provider.call_count(), 3);
        assert_eq!(provider.requests()[0], msgs);
        assert_eq!(provider.remaining(), 0);
    }
}
