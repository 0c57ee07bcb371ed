//! Stdio 传输 - JSON Lines 宿主桥
//!
//! 入站（stdin）每行一个 `TransportEvent`；出站（stdout）每行一个 `OutboundEvent`。
//! 子会话 ID 由本地生成：`thread-<毫秒时间戳>-<计数>`。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use super::{InboundMessage, Transport, TransportEvent};
use crate::error::TransportError;

/// 全局计数器，保证同一毫秒内生成的 ID 也不重复
static THREAD_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// 出站事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    ThreadCreated {
        thread_id: String,
        parent_channel_id: String,
        name: String,
    },
    Send {
        channel_id: String,
        content: String,
    },
}

fn generate_thread_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let n = THREAD_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("thread-{}-{}", millis, n)
}

pub struct StdioTransport {
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl StdioTransport {
    /// 输出到进程 stdout
    pub fn new() -> Self {
        Self::with_writer(tokio::io::stdout())
    }

    pub fn with_writer<W: AsyncWrite + Send + Unpin + 'static>(writer: W) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
        }
    }

    async fn emit(&self, event: &OutboundEvent) -> Result<(), TransportError> {
        let line = serde_json::to_string(event)
            .map_err(|e| TransportError::Io(std::io::Error::other(e)))?;
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn create_thread(
        &self,
        origin: &InboundMessage,
        name: &str,
    ) -> Result<String, TransportError> {
        let thread_id = generate_thread_id();
        self.emit(&OutboundEvent::ThreadCreated {
            thread_id: thread_id.clone(),
            parent_channel_id: origin.channel_id.clone(),
            name: name.to_string(),
        })
        .await
        .map_err(|e| TransportError::CreateThread(e.to_string()))?;
        Ok(thread_id)
    }

    async fn send(&self, channel_id: &str, content: &str) -> Result<(), TransportError> {
        self.emit(&OutboundEvent::Send {
            channel_id: channel_id.to_string(),
            content: content.to_string(),
        })
        .await
        .map_err(|e| TransportError::Send {
            channel_id: channel_id.to_string(),
            reason: e.to_string(),
        })
    }
}

/// 逐行读取入站事件并转发，EOF 或接收端关闭时返回
///
/// 无法解析的行记录日志后跳过。
pub async fn read_events<R>(reader: R, tx: mpsc::Sender<TransportEvent>) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<TransportEvent>(line) {
            Ok(event) => {
                if tx.send(event).await.is_err() {
                    debug!("Event receiver closed, stopping reader");
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "Skipping unparseable inbound line");
            }
        }
    }
    Ok(())
}
