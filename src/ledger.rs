//! 费用账本 - 按会话和汇总记录分类/回复调用费用

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ai::TokenUsage;

/// 费率：每 1k token 单价 + 舍入精度
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostRates {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
    /// 保留的小数位数
    pub precision: u32,
}

impl CostRates {
    /// 计算一次调用的费用
    ///
    /// `round(prompt/1000 * input + completion/1000 * output, precision)`
    pub fn compute_cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        let input = prompt_tokens as f64 / 1000.0 * self.input_per_1k;
        let output = completion_tokens as f64 / 1000.0 * self.output_per_1k;
        round_to(input + output, self.precision)
    }

    pub fn cost_of(&self, usage: TokenUsage) -> f64 {
        self.compute_cost(usage.prompt_tokens, usage.completion_tokens)
    }
}

fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}

/// 汇总费用
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostTotals {
    /// 分类调用总费用
    #[serde(default)]
    pub classification: f64,
    /// 会话回复总费用
    #[serde(default)]
    pub response: f64,
}

/// 费用账本
///
/// 所有值非负，运行期间只增不减；重启后从快照恢复而非清零。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostLedger {
    #[serde(default)]
    per_session: BTreeMap<String, f64>,
    #[serde(default)]
    totals: CostTotals,
}

impl CostLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次分类调用（不属于任何会话）
    pub fn record_classification(&mut self, amount: f64) {
        self.totals.classification += amount.max(0.0);
    }

    /// 记录一次会话回复调用
    pub fn record_response(&mut self, session_id: &str, amount: f64) {
        let amount = amount.max(0.0);
        *self.per_session.entry(session_id.to_string()).or_insert(0.0) += amount;
        self.totals.response += amount;
    }

    /// 为新会话建立 0.0 的账目（已存在则不变）
    pub fn open_session(&mut self, session_id: &str) {
        self.per_session.entry(session_id.to_string()).or_insert(0.0);
    }

    pub fn session_cost(&self, session_id: &str) -> Option<f64> {
        self.per_session.get(session_id).copied()
    }

    pub fn totals(&self) -> CostTotals {
        self.totals
    }

    pub fn per_session(&self) -> &BTreeMap<String, f64> {
        &self.per_session
    }

    /// 所有金额都是有限非负数
    pub fn is_valid(&self) -> bool {
        let ok = |v: f64| v.is_finite() && v >= 0.0;
        ok(self.totals.classification)
            && ok(self.totals.response)
            && self.per_session.values().all(|v| ok(*v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rates() -> CostRates {
        CostRates {
            input_per_1k: 0.01,
            output_per_1k: 0.02,
            precision: 6,
        }
    }

    #[test]
    fn test_compute_cost() {
        // 0.01 * 1 + 0.02 * 0.5
        let cost = rates().compute_cost(1000, 500);
        assert!((cost - 0.02).abs() < 1e-12, "got {}", cost);
    }

    #[test]
    fn test_compute_cost_rounds_to_precision() {
        let cost = rates().compute_cost(1, 1);
        // 0.00001 + 0.00002
        assert!((cost - 0.00003).abs() < 1e-12);

        let coarse = CostRates {
            precision: 2,
            ..rates()
        };
        assert_eq!(coarse.compute_cost(1, 1), 0.0);
        assert_eq!(coarse.compute_cost(0, 0), 0.0);
    }

    #[test]
    fn test_record_classification_is_not_session_scoped() {
        let mut ledger = CostLedger::new();
        ledger.record_classification(0.5);
        ledger.record_classification(0.25);

        assert_eq!(ledger.totals().classification, 0.75);
        assert_eq!(ledger.totals().response, 0.0);
        assert!(ledger.per_session().is_empty());
    }

    #[test]
    fn test_record_response_updates_session_and_total() {
        let mut ledger = CostLedger::new();
        ledger.record_response("t-1", 0.1);
        ledger.record_response("t-1", 0.2);
        ledger.record_response("t-2", 0.4);

        assert!((ledger.session_cost("t-1").unwrap() - 0.3).abs() < 1e-12);
        assert_eq!(ledger.session_cost("t-2"), Some(0.4));
        assert!((ledger.totals().response - 0.7).abs() < 1e-12);
        assert_eq!(ledger.session_cost("missing"), None);
    }

    #[test]
    fn test_open_session_does_not_reset() {
        let mut ledger = CostLedger::new();
        ledger.open_session("t-1");
        assert_eq!(ledger.session_cost("t-1"), Some(0.0));

        ledger.record_response("t-1", 0.3);
        ledger.open_session("t-1");
        assert_eq!(ledger.session_cost("t-1"), Some(0.3));
    }

    #[test]
    fn test_is_valid() {
        let mut ledger = CostLedger::new();
        ledger.record_response("t-1", 0.3);
        assert!(ledger.is_valid());

        let bad: CostLedger =
            serde_json::from_str(r#"{"per_session": {"t-1": -1.0}, "totals": {}}"#).unwrap();
        assert!(!bad.is_valid());
    }
}
