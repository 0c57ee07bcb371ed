//! 服务运行时 - 事件循环、定时保存与有序关闭
//!
//! 启动时加载快照；宿主就绪后开始定时保存；关闭时停止定时任务并同步保存一次。

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::ai::ChatProvider;
use crate::config::TriageConfig;
use crate::orchestrator::SessionOrchestrator;
use crate::persistence::PersistenceManager;
use crate::state::SharedState;
use crate::transport::{Transport, TransportEvent};

/// 保存一次当前状态；失败只记录日志
pub async fn save_snapshot(state: &SharedState, persistence: &PersistenceManager) -> bool {
    let snapshot = state.snapshot().await;
    match persistence.save(&snapshot) {
        Ok(()) => {
            info!(
                path = %persistence.path().display(),
                sessions = snapshot.sessions.len(),
                "State saved"
            );
            true
        }
        Err(e) => {
            error!(path = %persistence.path().display(), error = %e, "Failed to save state");
            false
        }
    }
}

/// 启动定时保存任务，收到关闭信号后退出（不做最终保存）
pub fn spawn_autosave(
    state: Arc<SharedState>,
    persistence: Arc<PersistenceManager>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    save_snapshot(&state, &persistence).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Autosave task stopping");
                        break;
                    }
                }
            }
        }
    })
}

/// 分诊服务
pub struct TriageService {
    state: Arc<SharedState>,
    persistence: Arc<PersistenceManager>,
    orchestrator: Arc<SessionOrchestrator>,
    save_interval: Duration,
}

impl TriageService {
    /// 加载快照并组装各组件
    pub fn new(
        config: &TriageConfig,
        classifier: Arc<dyn ChatProvider>,
        responder: Arc<dyn ChatProvider>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let persistence = Arc::new(PersistenceManager::new(&config.data_file));
        let snapshot = persistence.load();
        let state = Arc::new(SharedState::from_snapshot(snapshot, config.history_window));
        let orchestrator = Arc::new(SessionOrchestrator::from_config(
            config,
            state.clone(),
            classifier,
            responder,
            transport,
        ));

        Self {
            state,
            persistence,
            orchestrator,
            save_interval: config.save_interval(),
        }
    }

    /// 覆盖保存间隔
    pub fn with_save_interval(mut self, interval: Duration) -> Self {
        self.save_interval = interval;
        self
    }

    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    pub fn orchestrator(&self) -> &Arc<SessionOrchestrator> {
        &self.orchestrator
    }

    /// 主循环：处理事件直到输入结束或收到 Ctrl-C
    pub async fn run(self, events: mpsc::Receiver<TransportEvent>) -> Result<()> {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        };
        self.run_until(events, ctrl_c).await
    }

    /// 主循环，`stop_signal` 完成时进入关闭流程
    pub async fn run_until<F>(
        self,
        mut events: mpsc::Receiver<TransportEvent>,
        stop_signal: F,
    ) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut autosave: Option<JoinHandle<()>> = None;
        tokio::pin!(stop_signal);

        info!("Triage service started");

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(TransportEvent::Ready) => {
                        self.on_ready(&mut autosave, &stop_rx);
                    }
                    Some(TransportEvent::Message(msg)) => {
                        let orchestrator = self.orchestrator.clone();
                        tokio::spawn(async move {
                            let outcome = orchestrator.handle(&msg).await;
                            debug!(channel_id = %msg.channel_id, ?outcome, "Message handled");
                        });
                    }
                    None => {
                        info!("Inbound stream closed");
                        break;
                    }
                },
                _ = &mut stop_signal => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        self.shutdown(stop_tx, autosave).await;
        Ok(())
    }

    /// 宿主就绪：首次时启动定时保存，返回是否新启动了任务
    fn on_ready(
        &self,
        autosave: &mut Option<JoinHandle<()>>,
        stop_rx: &watch::Receiver<bool>,
    ) -> bool {
        if autosave.is_some() {
            debug!("Host ready again, autosave already running");
            return false;
        }
        info!(interval_secs = self.save_interval.as_secs(), "Host ready, autosave scheduled");
        *autosave = Some(spawn_autosave(
            self.state.clone(),
            self.persistence.clone(),
            self.save_interval,
            stop_rx.clone(),
        ));
        true
    }

    /// 停止定时保存，再同步保存一次
    async fn shutdown(&self, stop_tx: watch::Sender<bool>, autosave: Option<JoinHandle<()>>) {
        let _ = stop_tx.send(true);
        if let Some(handle) = autosave {
            if let Err(e) = handle.await {
                warn!(error = %e, "Autosave task ended abnormally");
            }
        }
        save_snapshot(&self.state, &self.persistence).await;
        info!("Triage service stopped");
    }
}
