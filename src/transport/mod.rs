//! 传输层 - 入站消息事件与子会话创建能力
//!
//! 核心只依赖 `Transport` trait；具体宿主（stdio 桥、内存实现）在子模块中。

pub mod memory;
pub mod stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

pub use memory::{CreatedThread, MemoryTransport, SentMessage};
pub use stdio::StdioTransport;

/// 入站消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// group（服务器）ID；私信等无 group 的消息为 None
    #[serde(default)]
    pub group_id: Option<String>,
    /// 消息所在 location（频道）ID
    pub channel_id: String,
    /// 消息位于已打开的子会话中时为该子会话 ID
    #[serde(default)]
    pub thread_id: Option<String>,
    pub author_id: String,
    pub author_name: String,
    pub content: String,
    /// 由本服务自己发出
    #[serde(default)]
    pub from_self: bool,
}

/// 宿主推送的事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportEvent {
    /// 宿主已就绪（定时保存从此开始）
    Ready,
    Message(InboundMessage),
}

/// 宿主提供的能力
#[async_trait]
pub trait Transport: Send + Sync {
    /// 以触发消息为起点创建子会话，返回新会话 ID
    async fn create_thread(
        &self,
        origin: &InboundMessage,
        name: &str,
    ) -> Result<String, TransportError>;

    /// 向频道或子会话发送文本
    async fn send(&self, channel_id: &str, content: &str) -> Result<(), TransportError>;
}
