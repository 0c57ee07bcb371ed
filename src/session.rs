//! 会话存储模块 - 每个会话的有界消息历史
//!
//! 历史长度不超过窗口 W，超出时从最早的消息开始丢弃（包括系统提示）。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ai::ChatMessage;

/// 会话摘要（列表展示用）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub message_count: usize,
    pub cost: f64,
}

/// 会话历史存储
#[derive(Debug, Clone)]
pub struct SessionStore {
    histories: BTreeMap<String, Vec<ChatMessage>>,
    window: usize,
}

impl SessionStore {
    /// 创建空存储，window 至少为 1
    pub fn new(window: usize) -> Self {
        Self {
            histories: BTreeMap::new(),
            window: window.max(1),
        }
    }

    /// 从快照恢复
    pub fn from_histories(histories: BTreeMap<String, Vec<ChatMessage>>, window: usize) -> Self {
        Self {
            histories,
            window: window.max(1),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// 不存在则以系统提示建立会话，返回当前历史
    pub fn ensure(&mut self, session_id: &str, system_prompt: &str) -> &[ChatMessage] {
        self.histories
            .entry(session_id.to_string())
            .or_insert_with(|| vec![ChatMessage::system(system_prompt)])
    }

    /// 追加消息，超出窗口时保留最后 W 条
    pub fn append(&mut self, session_id: &str, message: ChatMessage) {
        let window = self.window;
        let history = self.histories.entry(session_id.to_string()).or_default();
        history.push(message);
        if history.len() > window {
            let excess = history.len() - window;
            history.drain(..excess);
        }
    }

    pub fn get(&self, session_id: &str) -> Option<&[ChatMessage]> {
        self.histories.get(session_id).map(Vec::as_slice)
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.histories.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.histories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.histories.keys().map(String::as_str)
    }

    /// 全部历史的拷贝（用于快照）
    pub fn histories(&self) -> BTreeMap<String, Vec<ChatMessage>> {
        self.histories.clone()
    }
}
