//! 共享状态 - 注册表、会话历史、费用账本的所有权边界
//!
//! 每个结构各自一把锁，只在同步操作期间持有，不跨越远端调用的 `.await`。
//! 需要同时持有多把锁时按 registry -> sessions -> ledger 的顺序获取。

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};

use crate::ledger::CostLedger;
use crate::persistence::Snapshot;
use crate::registry::ChannelRegistry;
use crate::session::{SessionInfo, SessionStore};

pub struct SharedState {
    registry: RwLock<ChannelRegistry>,
    sessions: Mutex<SessionStore>,
    ledger: Mutex<CostLedger>,
}

impl SharedState {
    pub fn new(window: usize) -> Self {
        Self::from_snapshot(Snapshot::default(), window)
    }

    /// 用加载的快照建立状态（仅在启动时）
    pub fn from_snapshot(snapshot: Snapshot, window: usize) -> Self {
        Self {
            registry: RwLock::new(snapshot.guilds),
            sessions: Mutex::new(SessionStore::from_histories(snapshot.sessions, window)),
            ledger: Mutex::new(snapshot.costs),
        }
    }

    pub fn registry(&self) -> &RwLock<ChannelRegistry> {
        &self.registry
    }

    pub fn sessions(&self) -> &Mutex<SessionStore> {
        &self.sessions
    }

    pub fn ledger(&self) -> &Mutex<CostLedger> {
        &self.ledger
    }

    /// 一致性快照：同时持有三把锁后再拷贝，不会看到写了一半的会话
    pub async fn snapshot(&self) -> Snapshot {
        let registry = self.registry.read().await;
        let sessions = self.sessions.lock().await;
        let ledger = self.ledger.lock().await;

        Snapshot {
            guilds: registry.clone(),
            sessions: sessions.histories(),
            costs: ledger.clone(),
            saved_at: Some(Utc::now()),
        }
    }

    /// 会话列表（含各自费用）
    pub async fn session_infos(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.lock().await;
        let ledger = self.ledger.lock().await;

        sessions
            .ids()
            .map(|id| SessionInfo {
                id: id.to_string(),
                message_count: sessions.get(id).map_or(0, <[_]>::len),
                cost: ledger.session_cost(id).unwrap_or(0.0),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::ChatMessage;

    #[tokio::test]
    async fn test_snapshot_reflects_all_sections() {
        let state = SharedState::new(10);
        state.registry().write().await.watch("g1", "c1");
        {
            let mut sessions = state.sessions().lock().await;
            sessions.ensure("t-1", "sys");
            sessions.append("t-1", ChatMessage::user("hi"));
        }
        state.ledger().lock().await.record_response("t-1", 0.02);

        let snapshot = state.snapshot().await;
        assert!(snapshot.guilds.is_watched("g1", "c1"));
        assert_eq!(snapshot.sessions["t-1"].len(), 2);
        assert_eq!(snapshot.costs.session_cost("t-1"), Some(0.02));
        assert!(snapshot.saved_at.is_some());
    }

    #[tokio::test]
    async fn test_session_infos() {
        let state = SharedState::new(10);
        state.sessions().lock().await.ensure("t-1", "sys");
        state.ledger().lock().await.record_response("t-1", 0.5);

        let infos = state.session_infos().await;
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].id, "t-1");
        assert_eq!(infos[0].message_count, 1);
        assert_eq!(infos[0].cost, 0.5);
    }
}
