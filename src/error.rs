//! 错误类型 - 远端能力与传输层的失败

use thiserror::Error;

/// 分类/回复远端调用失败（区别于回复内容无法解析）
#[derive(Debug, Error)]
pub enum ProviderError {
    /// 请求未完成（网络、超时）
    #[error("request failed: {0}")]
    Request(String),

    /// 服务端返回非 2xx
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// 响应体无法解析
    #[error("failed to parse response: {0}")]
    Parse(String),

    /// 响应中没有任何 choice
    #[error("response contained no choices")]
    EmptyChoices,
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Request(e.to_string())
    }
}

/// 传输层失败：创建子会话或发送消息
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("could not create thread: {0}")]
    CreateThread(String),

    #[error("could not send to {channel_id}: {reason}")]
    Send { channel_id: String, reason: String },

    #[error("transport io: {0}")]
    Io(#[from] std::io::Error),
}
