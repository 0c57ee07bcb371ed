//! 监听频道注册表 - 每个 group 下被监听的 location 集合
//!
//! 序列化格式与旧版 `active_channels.json` 兼容：
//! `{"<group>": {"channels": ["<location>", ...]}}`

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// 单个 group 的监听列表
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupChannels {
    #[serde(default)]
    pub channels: BTreeSet<String>,
}

/// 注册表变更结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryChange {
    Changed,
    Unchanged,
}

/// 监听频道注册表
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelRegistry {
    groups: BTreeMap<String, GroupChannels>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 未登记的 group 一律返回 false
    pub fn is_watched(&self, group_id: &str, location_id: &str) -> bool {
        self.groups
            .get(group_id)
            .is_some_and(|g| g.channels.contains(location_id))
    }

    pub fn watch(&mut self, group_id: &str, location_id: &str) -> RegistryChange {
        let inserted = self
            .groups
            .entry(group_id.to_string())
            .or_default()
            .channels
            .insert(location_id.to_string());
        if inserted {
            RegistryChange::Changed
        } else {
            RegistryChange::Unchanged
        }
    }

    /// 移除监听；group 为空时一并移除
    pub fn unwatch(&mut self, group_id: &str, location_id: &str) -> RegistryChange {
        let Some(group) = self.groups.get_mut(group_id) else {
            return RegistryChange::Unchanged;
        };
        let removed = group.channels.remove(location_id);
        if group.channels.is_empty() {
            self.groups.remove(group_id);
        }
        if removed {
            RegistryChange::Changed
        } else {
            RegistryChange::Unchanged
        }
    }

    pub fn channels(&self, group_id: &str) -> Vec<String> {
        self.groups
            .get(group_id)
            .map(|g| g.channels.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn groups(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.groups.iter().map(|(k, v)| (k.as_str(), &v.channels))
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_group_is_not_watched() {
        let registry = ChannelRegistry::new();
        assert!(!registry.is_watched("g1", "c1"));
        assert!(registry.channels("g1").is_empty());
    }

    #[test]
    fn test_watch_and_unwatch() {
        let mut registry = ChannelRegistry::new();
        assert_eq!(registry.watch("g1", "c1"), RegistryChange::Changed);
        assert_eq!(registry.watch("g1", "c1"), RegistryChange::Unchanged);
        assert!(registry.is_watched("g1", "c1"));
        assert!(!registry.is_watched("g2", "c1"));

        assert_eq!(registry.unwatch("g1", "c2"), RegistryChange::Unchanged);
        assert_eq!(registry.unwatch("g1", "c1"), RegistryChange::Changed);
        assert!(!registry.is_watched("g1", "c1"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_legacy_format() {
        let json = r#"{"123": {"channels": ["456", "789"]}}"#;
        let registry: ChannelRegistry = serde_json::from_str(json).unwrap();
        assert!(registry.is_watched("123", "456"));
        assert!(registry.is_watched("123", "789"));
        assert_eq!(registry.channels("123"), vec!["456", "789"]);

        let back = serde_json::to_value(&registry).unwrap();
        assert_eq!(back["123"]["channels"][0], "456");
    }
}
