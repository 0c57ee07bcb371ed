//! 分诊模块 - 判断一条消息是否需要开启支持会话
//!
//! 最多调用分类能力 `max_attempts` 次，第一次得到 YES/NO 即返回。
//! 每次调用都计费，不论回复是否可用。

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::ai::{ChatMessage, ChatProvider};
use crate::error::ProviderError;
use crate::ledger::CostRates;
use crate::state::SharedState;

/// 分诊结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Yes,
    No,
    /// 所有尝试都没有得到合法回复
    Indeterminate,
}

impl Decision {
    /// 去空白、转大写后解析，只接受 YES/NO
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "YES" => Some(Decision::Yes),
            "NO" => Some(Decision::No),
            _ => None,
        }
    }
}

/// 一次分诊的结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriageOutcome {
    pub decision: Decision,
    /// 实际调用次数
    pub attempts: u32,
    /// 本次分诊累计费用
    pub cost: f64,
}

/// 分诊引擎
pub struct TriageEngine {
    classifier: Arc<dyn ChatProvider>,
    state: Arc<SharedState>,
    rates: CostRates,
    prompt: String,
    max_attempts: u32,
}

impl TriageEngine {
    pub fn new(
        classifier: Arc<dyn ChatProvider>,
        state: Arc<SharedState>,
        rates: CostRates,
        prompt: impl Into<String>,
        max_attempts: u32,
    ) -> Self {
        Self {
            classifier,
            state,
            rates,
            prompt: prompt.into(),
            max_attempts: max_attempts.max(1),
        }
    }

    /// 分类种子：固定系统提示 + 候选用户消息
    pub fn seed(&self, content: &str) -> Vec<ChatMessage> {
        vec![ChatMessage::system(&self.prompt), ChatMessage::user(content)]
    }

    /// 对候选消息做分诊
    pub async fn decide_message(&self, content: &str) -> Result<TriageOutcome, ProviderError> {
        self.decide(&self.seed(content)).await
    }

    /// 有界重试，第一个合法结论胜出
    ///
    /// 远端调用失败直接返回错误，不再继续尝试；之前的尝试费用已经入账。
    pub async fn decide(&self, seed: &[ChatMessage]) -> Result<TriageOutcome, ProviderError> {
        let mut total_cost = 0.0;
        let mut attempts = 0;

        while attempts < self.max_attempts {
            attempts += 1;

            let completion = self.classifier.chat(seed).await?;

            let cost = self.rates.cost_of(completion.usage);
            total_cost += cost;
            let classification_total = {
                let mut ledger = self.state.ledger().lock().await;
                ledger.record_classification(cost);
                ledger.totals().classification
            };

            debug!(
                attempt = attempts,
                max_attempts = self.max_attempts,
                cost,
                classification_total,
                "Classification call"
            );

            if let Some(decision) = Decision::parse(&completion.content) {
                info!(?decision, attempts, cost = total_cost, "Triage decided");
                return Ok(TriageOutcome {
                    decision,
                    attempts,
                    cost: total_cost,
                });
            }

            warn!(
                attempt = attempts,
                reply = %completion.content.trim(),
                "Classification reply was not YES/NO"
            );
        }

        error!(
            attempts,
            cost = total_cost,
            "Failed to get a valid decision after {} attempts", attempts
        );
        Ok(TriageOutcome {
            decision: Decision::Indeterminate,
            attempts,
            cost: total_cost,
        })
    }
}
