//! 会话编排 - 入站消息路由、分诊、回复与计费
//!
//! 每个 (group, location) 的状态：
//! - `Unwatched`：不处理
//! - `WatchedNoSession`：分诊，YES 时创建子会话并给出首个回复
//! - `ActiveSession`：消息本身位于子会话中，追加并回复
//!
//! 自己发出的消息在任何状态判断之前被忽略。

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::ai::{ChatMessage, ChatProvider};
use crate::config::TriageConfig;
use crate::error::ProviderError;
use crate::ledger::CostRates;
use crate::state::SharedState;
use crate::transport::{InboundMessage, Transport};
use crate::triage::{Decision, TriageEngine};

/// 子会话创建失败时发回原频道的提示
pub const THREAD_CREATION_FAILED_NOTICE: &str = "Could not create thread.";

/// 回复生成失败时发到会话内的提示
pub fn completion_error_notice(error: &ProviderError) -> String {
    format!("Error generating response: {}", error)
}

/// 消息所处位置的状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationState {
    Unwatched,
    WatchedNoSession,
    ActiveSession(String),
}

/// 单条消息的处理结果（仅用于日志和测试）
#[derive(Debug, Clone, PartialEq)]
pub enum HandleOutcome {
    /// 自己发出的消息
    IgnoredSelf,
    Unwatched,
    /// 分诊结论为 NO 或 INDETERMINATE
    Declined(Decision),
    /// 分类调用失败
    TriageFailed,
    ThreadCreationFailed,
    SessionOpened { session_id: String },
    Replied { session_id: String },
    CompletionFailed { session_id: String },
}

/// 编排器设置
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub system_prompt: String,
    pub thread_name_prefix: String,
    pub rates: CostRates,
}

impl OrchestratorSettings {
    pub fn from_config(config: &TriageConfig) -> Self {
        Self {
            system_prompt: config.system_prompt.clone(),
            thread_name_prefix: config.thread_name_prefix.clone(),
            rates: config.rates(),
        }
    }
}

pub struct SessionOrchestrator {
    state: Arc<SharedState>,
    triage: TriageEngine,
    responder: Arc<dyn ChatProvider>,
    transport: Arc<dyn Transport>,
    settings: OrchestratorSettings,
    /// 每个会话一把轮次锁：一轮（追加用户消息 -> 回复 -> 追加回复）内串行
    turn_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionOrchestrator {
    pub fn new(
        state: Arc<SharedState>,
        triage: TriageEngine,
        responder: Arc<dyn ChatProvider>,
        transport: Arc<dyn Transport>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            state,
            triage,
            responder,
            transport,
            settings,
            turn_locks: Mutex::new(HashMap::new()),
        }
    }

    /// 用同一配置组装编排器
    pub fn from_config(
        config: &TriageConfig,
        state: Arc<SharedState>,
        classifier: Arc<dyn ChatProvider>,
        responder: Arc<dyn ChatProvider>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let triage = TriageEngine::new(
            classifier,
            state.clone(),
            config.rates(),
            &config.classification_prompt,
            config.max_classification_attempts,
        );
        Self::new(
            state,
            triage,
            responder,
            transport,
            OrchestratorSettings::from_config(config),
        )
    }

    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    /// 判断消息所处位置的状态
    ///
    /// 子会话通过消息结构识别，不查注册表。
    pub async fn location_state(&self, msg: &InboundMessage) -> LocationState {
        if let Some(thread_id) = &msg.thread_id {
            return LocationState::ActiveSession(thread_id.clone());
        }

        let watched = match &msg.group_id {
            Some(group_id) => self
                .state
                .registry()
                .read()
                .await
                .is_watched(group_id, &msg.channel_id),
            None => false,
        };

        if watched {
            LocationState::WatchedNoSession
        } else {
            LocationState::Unwatched
        }
    }

    /// 处理一条入站消息
    pub async fn handle(&self, msg: &InboundMessage) -> HandleOutcome {
        if msg.from_self {
            return HandleOutcome::IgnoredSelf;
        }

        match self.location_state(msg).await {
            LocationState::Unwatched => HandleOutcome::Unwatched,
            LocationState::WatchedNoSession => self.handle_triage(msg).await,
            LocationState::ActiveSession(session_id) => {
                self.handle_session_turn(&session_id, msg).await
            }
        }
    }

    async fn handle_triage(&self, msg: &InboundMessage) -> HandleOutcome {
        let outcome = match self.triage.decide_message(&msg.content).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(channel_id = %msg.channel_id, error = %e, "Error in decision API call");
                return HandleOutcome::TriageFailed;
            }
        };

        let total = self.state.ledger().lock().await.totals().classification;
        info!(
            channel_id = %msg.channel_id,
            decision = ?outcome.decision,
            cost = outcome.cost,
            classification_total = total,
            "Final decision cost: ${:.4} | Total decision costs: ${:.4}",
            outcome.cost,
            total
        );

        if outcome.decision != Decision::Yes {
            return HandleOutcome::Declined(outcome.decision);
        }

        let name = format!("{} {}", self.settings.thread_name_prefix, msg.author_name);
        let session_id = match self.transport.create_thread(msg, &name).await {
            Ok(id) => id,
            Err(e) => {
                warn!(channel_id = %msg.channel_id, error = %e, "Thread creation failed");
                if let Err(e) = self
                    .transport
                    .send(&msg.channel_id, THREAD_CREATION_FAILED_NOTICE)
                    .await
                {
                    warn!(channel_id = %msg.channel_id, error = %e, "Failed to send notice");
                }
                return HandleOutcome::ThreadCreationFailed;
            }
        };

        info!(session_id = %session_id, name = %name, "Session opened");

        // 子会话一创建就写入种子，之后到达的同会话消息只会排在触发消息之后。
        // 取得轮次锁之前仍有一个很小的窗口：后续消息可能先完成一轮回复，但历史顺序不变。
        {
            let mut sessions = self.state.sessions().lock().await;
            sessions.ensure(&session_id, &self.settings.system_prompt);
            sessions.append(&session_id, ChatMessage::user(&msg.content));
            self.state.ledger().lock().await.open_session(&session_id);
        }

        let turn = self.turn_lock(&session_id).await;
        let result = {
            let _guard = turn.lock().await;
            self.respond(&session_id).await
        };
        self.release_turn_lock(&session_id, turn).await;

        match result {
            Ok(()) => HandleOutcome::SessionOpened { session_id },
            Err(_) => HandleOutcome::CompletionFailed { session_id },
        }
    }

    async fn handle_session_turn(&self, session_id: &str, msg: &InboundMessage) -> HandleOutcome {
        let turn = self.turn_lock(session_id).await;
        let result = {
            let _guard = turn.lock().await;

            {
                let mut sessions = self.state.sessions().lock().await;
                if !sessions.contains(session_id) {
                    debug!(session_id = %session_id, "Discovered session without history, seeding");
                }
                sessions.ensure(session_id, &self.settings.system_prompt);
                sessions.append(session_id, ChatMessage::user(&msg.content));
            }

            self.respond(session_id).await
        };
        self.release_turn_lock(session_id, turn).await;

        match result {
            Ok(()) => HandleOutcome::Replied {
                session_id: session_id.to_string(),
            },
            Err(_) => HandleOutcome::CompletionFailed {
                session_id: session_id.to_string(),
            },
        }
    }

    /// 以当前（已裁剪的）历史请求回复，计费、追加并发送
    ///
    /// 调用失败时在会话内发送错误提示。
    async fn respond(&self, session_id: &str) -> Result<(), ProviderError> {
        let history: Vec<ChatMessage> = self
            .state
            .sessions()
            .lock()
            .await
            .get(session_id)
            .map(<[ChatMessage]>::to_vec)
            .unwrap_or_default();

        let completion = match self.responder.chat(&history).await {
            Ok(c) => c,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Completion failed");
                self.send_or_log(session_id, &completion_error_notice(&e)).await;
                return Err(e);
            }
        };

        let cost = self.settings.rates.cost_of(completion.usage);

        // 回复与费用在同一临界区内落地（sessions -> ledger），快照看不到只有其一的状态
        let (session_total, global_total) = {
            let mut sessions = self.state.sessions().lock().await;
            let mut ledger = self.state.ledger().lock().await;
            sessions.append(session_id, ChatMessage::assistant(&completion.content));
            ledger.record_response(session_id, cost);
            (
                ledger.session_cost(session_id).unwrap_or(cost),
                ledger.totals().response,
            )
        };
        info!(
            session_id = %session_id,
            cost,
            session_total,
            global_total,
            "Thread response cost: ${:.4} | Thread total: ${:.4} | Global total: ${:.4}",
            cost,
            session_total,
            global_total
        );

        self.send_or_log(session_id, &completion.content).await;
        Ok(())
    }

    async fn send_or_log(&self, channel_id: &str, content: &str) {
        if let Err(e) = self.transport.send(channel_id, content).await {
            warn!(channel_id = %channel_id, error = %e, "Send failed");
        }
    }

    async fn turn_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.turn_locks
            .lock()
            .await
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    /// 轮次结束后，没有其他轮次持有或等待时移除该会话的锁
    async fn release_turn_lock(&self, session_id: &str, turn: Arc<Mutex<()>>) {
        let mut locks = self.turn_locks.lock().await;
        // map 中一份 + 当前这一份；其他等待者只能在持有 map 锁时克隆
        if Arc::strong_count(&turn) <= 2 {
            locks.remove(session_id);
        }
    }

    #[cfg(test)]
    async fn turn_lock_count(&self) -> usize {
        self.turn_locks.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::ScriptedProvider;
    use crate::transport::MemoryTransport;

    fn message(thread_id: Option<&str>, content: &str) -> InboundMessage {
        InboundMessage {
            group_id: Some("g1".to_string()),
            channel_id: "c1".to_string(),
            thread_id: thread_id.map(str::to_string),
            author_id: "u1".to_string(),
            author_name: "alice".to_string(),
            content: content.to_string(),
            from_self: false,
        }
    }

    fn orchestrator(
        classifier: ScriptedProvider,
        responder: ScriptedProvider,
    ) -> (SessionOrchestrator, Arc<MemoryTransport>) {
        let config = TriageConfig::default();
        let state = Arc::new(SharedState::new(config.history_window));
        let transport = Arc::new(MemoryTransport::new());
        let orch = SessionOrchestrator::from_config(
            &config,
            state,
            Arc::new(classifier),
            Arc::new(responder),
            transport.clone(),
        );
        (orch, transport)
    }

    #[tokio::test]
    async fn test_self_messages_are_ignored_everywhere() {
        let (orch, transport) = orchestrator(ScriptedProvider::new(), ScriptedProvider::new());
        orch.state().registry().write().await.watch("g1", "c1");

        let mut msg = message(None, "help");
        msg.from_self = true;
        assert_eq!(orch.handle(&msg).await, HandleOutcome::IgnoredSelf);

        msg.thread_id = Some("thread-9".to_string());
        assert_eq!(orch.handle(&msg).await, HandleOutcome::IgnoredSelf);
        assert!(transport.sent().is_empty());
        assert!(orch.state().sessions().lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_location_state() {
        let (orch, _) = orchestrator(ScriptedProvider::new(), ScriptedProvider::new());
        assert_eq!(
            orch.location_state(&message(None, "x")).await,
            LocationState::Unwatched
        );

        orch.state().registry().write().await.watch("g1", "c1");
        assert_eq!(
            orch.location_state(&message(None, "x")).await,
            LocationState::WatchedNoSession
        );
        assert_eq!(
            orch.location_state(&message(Some("t-1"), "x")).await,
            LocationState::ActiveSession("t-1".to_string())
        );

        let mut dm = message(None, "x");
        dm.group_id = None;
        assert_eq!(orch.location_state(&dm).await, LocationState::Unwatched);
    }

    #[tokio::test]
    async fn test_declined_has_no_visible_effect() {
        let (orch, transport) = orchestrator(
            ScriptedProvider::new().reply("NO", 100, 1),
            ScriptedProvider::new(),
        );
        orch.state().registry().write().await.watch("g1", "c1");

        let outcome = orch.handle(&message(None, "gm everyone")).await;
        assert_eq!(outcome, HandleOutcome::Declined(Decision::No));
        assert!(transport.sent().is_empty());
        assert!(transport.threads().is_empty());
    }

    #[tokio::test]
    async fn test_thread_name_uses_author() {
        let (orch, transport) = orchestrator(
            ScriptedProvider::new().reply("YES", 1, 1),
            ScriptedProvider::new().reply("On it.", 1, 1),
        );
        orch.state().registry().write().await.watch("g1", "c1");

        orch.handle(&message(None, "help")).await;
        assert_eq!(transport.threads()[0].name, "Help with alice");
    }

    #[tokio::test]
    async fn test_turn_locks_are_released_after_turn() {
        let (orch, _) = orchestrator(
            ScriptedProvider::new().reply("YES", 1, 1),
            ScriptedProvider::new()
                .reply("first", 1, 1)
                .reply("second", 1, 1)
                .fail(ProviderError::EmptyChoices),
        );
        orch.state().registry().write().await.watch("g1", "c1");

        orch.handle(&message(None, "help")).await;
        assert_eq!(orch.turn_lock_count().await, 0);

        orch.handle(&message(Some("t-discovered"), "hi")).await;
        orch.handle(&message(Some("t-discovered"), "again")).await;
        assert_eq!(orch.turn_lock_count().await, 0);
        assert_eq!(orch.state().sessions().lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_waiting_turn_keeps_lock_entry() {
        let (orch, _) = orchestrator(ScriptedProvider::new(), ScriptedProvider::new());

        let held = orch.turn_lock("t-1").await;
        let waiting = orch.turn_lock("t-1").await;
        // 仍有其他持有者，不能移除
        orch.release_turn_lock("t-1", held).await;
        assert_eq!(orch.turn_lock_count().await, 1);

        orch.release_turn_lock("t-1", waiting).await;
        assert_eq!(orch.turn_lock_count().await, 0);
    }
}
