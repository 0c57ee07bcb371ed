//! 持久化模块 - 快照的加载与保存
//!
//! 快照 = 监听注册表 + 全部会话历史 + 费用账本，作为一个整体读写。
//! 加载失败退化为空状态，保存失败只记录日志，都不会终止进程。

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use crate::ai::ChatMessage;
use crate::ledger::CostLedger;
use crate::registry::ChannelRegistry;

/// 持久化快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// 监听注册表（字段名沿用旧版 active_channels.json）
    #[serde(default)]
    pub guilds: ChannelRegistry,
    /// 会话 ID -> 有序历史
    #[serde(default)]
    pub sessions: BTreeMap<String, Vec<ChatMessage>>,
    #[serde(default)]
    pub costs: CostLedger,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
}

/// 快照文件管理器
pub struct PersistenceManager {
    path: PathBuf,
}

impl PersistenceManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("tmp")
    }

    /// 加载快照；文件不存在或损坏时返回空快照
    pub fn load(&self) -> Snapshot {
        if !self.path.exists() {
            info!(path = %self.path.display(), "No snapshot found, starting empty");
            return Snapshot::default();
        }

        match self.try_load() {
            Ok(snapshot) => {
                info!(
                    path = %self.path.display(),
                    sessions = snapshot.sessions.len(),
                    "Snapshot loaded"
                );
                snapshot
            }
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Snapshot unreadable, starting empty");
                Snapshot::default()
            }
        }
    }

    /// 严格加载：任何解析或校验失败都返回错误
    pub fn try_load(&self) -> Result<Snapshot> {
        let content = fs::read_to_string(&self.path)?;
        let snapshot: Snapshot = serde_json::from_str(&content)?;
        if !snapshot.costs.is_valid() {
            return Err(anyhow!("cost ledger contains negative or non-finite values"));
        }
        Ok(snapshot)
    }

    /// 保存快照：写临时文件后原子替换，期间持有独占锁
    pub fn save(&self, snapshot: &Snapshot) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path())?;
        lock_file.lock_exclusive()?;

        let result = self.write_atomic(snapshot);
        lock_file.unlock()?;
        result?;

        debug!(path = %self.path.display(), sessions = snapshot.sessions.len(), "Snapshot saved");
        Ok(())
    }

    fn write_atomic(&self, snapshot: &Snapshot) -> Result<()> {
        let temp_path = self.temp_path();
        {
            let mut temp_file = File::create(&temp_path)?;
            temp_file.write_all(serde_json::to_string_pretty(snapshot)?.as_bytes())?;
            temp_file.sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}
