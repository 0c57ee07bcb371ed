//! AI 类型定义模块
//!
//! 分类与回复调用共用的消息、用量类型。会话历史直接以这些类型持久化。

use serde::{Deserialize, Serialize};

// ============================================================================
// Role - 消息角色
// ============================================================================

/// 消息角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// 系统提示
    System,
    /// 用户消息
    User,
    /// 模型回复
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

// ============================================================================
// ChatMessage - 对话消息
// ============================================================================

/// 对话中的一条消息，顺序即对话顺序
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// ============================================================================
// Completion - 远端调用结果
// ============================================================================

/// Token 用量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// 一次分类/回复调用的结果：生成文本 + 用量
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub content: String,
    pub usage: TokenUsage,
}

impl Completion {
    pub fn new(content: impl Into<String>, prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            content: content.into(),
            usage: TokenUsage {
                prompt_tokens,
                completion_tokens,
            },
        }
    }
}
