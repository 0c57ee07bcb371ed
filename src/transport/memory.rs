//! 内存传输 - 记录创建的子会话和发出的消息
//!
//! 用于测试和离线运行，不连接任何宿主。

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{InboundMessage, Transport};
use crate::error::TransportError;

/// 一条已发送的消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub channel_id: String,
    pub content: String,
}

/// 一个已创建的子会话
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedThread {
    pub thread_id: String,
    pub parent_channel_id: String,
    pub name: String,
}

#[derive(Default)]
pub struct MemoryTransport {
    next_id: AtomicUsize,
    fail_create: AtomicBool,
    threads: Mutex<Vec<CreatedThread>>,
    sent: Mutex<Vec<SentMessage>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 之后的 create_thread 全部失败
    pub fn fail_thread_creation(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn threads(&self) -> Vec<CreatedThread> {
        lock(&self.threads).clone()
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        lock(&self.sent).clone()
    }

    /// 发往指定频道的消息内容
    pub fn sent_to(&self, channel_id: &str) -> Vec<String> {
        lock(&self.sent)
            .iter()
            .filter(|m| m.channel_id == channel_id)
            .map(|m| m.content.clone())
            .collect()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn create_thread(
        &self,
        origin: &InboundMessage,
        name: &str,
    ) -> Result<String, TransportError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(TransportError::CreateThread("thread creation disabled".to_string()));
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let thread_id = format!("thread-{}", n);
        lock(&self.threads).push(CreatedThread {
            thread_id: thread_id.clone(),
            parent_channel_id: origin.channel_id.clone(),
            name: name.to_string(),
        });
        Ok(thread_id)
    }

    async fn send(&self, channel_id: &str, content: &str) -> Result<(), TransportError> {
        lock(&self.sent).push(SentMessage {
            channel_id: channel_id.to_string(),
            content: content.to_string(),
        });
        Ok(())
    }
}
