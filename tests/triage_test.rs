//! 分诊引擎测试
//!
//! - 回复规范化（大小写、空白）
//! - 有界重试，第一个合法结论胜出
//! - 每次尝试都计费
//! - 远端调用失败与 INDETERMINATE 的区分

use std::sync::Arc;
use triage_desk::{
    ChatMessage, CostRates, Decision, ProviderError, ScriptedProvider, SharedState, TriageEngine,
};

const PROMPT: &str = "Respond exactly 'YES' or 'NO'.";

fn rates() -> CostRates {
    CostRates {
        input_per_1k: 0.01,
        output_per_1k: 0.02,
        precision: 6,
    }
}

fn setup(provider: ScriptedProvider) -> (TriageEngine, Arc<ScriptedProvider>, Arc<SharedState>) {
    let provider = Arc::new(provider);
    let state = Arc::new(SharedState::new(10));
    let engine = TriageEngine::new(provider.clone(), state.clone(), rates(), PROMPT, 3);
    (engine, provider, state)
}

// ============================================================================
// 结论解析
// ============================================================================

#[tokio::test]
async fn test_valid_replies_normalize_on_first_attempt() {
    for (raw, expected) in [
        ("YES", Decision::Yes),
        ("no", Decision::No),
        (" Yes ", Decision::Yes),
        ("\tNO\n", Decision::No),
    ] {
        // Given: 第一次回复合法，后面还排着一个无效回复
        let (engine, provider, _) = setup(
            ScriptedProvider::new()
                .reply(raw, 100, 1)
                .reply("MAYBE", 100, 1),
        );

        // When: 分诊
        let outcome = engine.decide_message("anything").await.unwrap();

        // Then: 第一次回复胜出，不再继续调用
        assert_eq!(outcome.decision, expected, "raw reply {:?}", raw);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(provider.call_count(), 1);
        assert_eq!(provider.remaining(), 1);
    }
}

// ============================================================================
// 重试与计费
// ============================================================================

#[tokio::test]
async fn test_three_invalid_replies_are_indeterminate() {
    // Given: 三次无法解析的回复，每次费用 0.01 + 0.00002
    let (engine, provider, state) = setup(
        ScriptedProvider::new()
            .reply("MAYBE", 1000, 1)
            .reply("MAYBE", 1000, 1)
            .reply("MAYBE", 1000, 1),
    );

    // When: 分诊
    let outcome = engine.decide_message("is this crypto?").await.unwrap();

    // Then: 恰好三次计费尝试后为 INDETERMINATE
    assert_eq!(outcome.decision, Decision::Indeterminate);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(provider.call_count(), 3);

    let per_call = rates().compute_cost(1000, 1);
    let totals = state.ledger().lock().await.totals();
    assert!((totals.classification - 3.0 * per_call).abs() < 1e-12);
    assert!((outcome.cost - 3.0 * per_call).abs() < 1e-12);
    assert_eq!(totals.response, 0.0);
}

#[tokio::test]
async fn test_valid_on_last_attempt() {
    let (engine, provider, _) = setup(
        ScriptedProvider::new()
            .reply("I think so", 10, 10)
            .reply("Y E S", 10, 10)
            .reply("yes", 10, 10),
    );

    let outcome = engine.decide_message("help").await.unwrap();
    assert_eq!(outcome.decision, Decision::Yes);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(provider.call_count(), 3);
}

#[tokio::test]
async fn test_every_attempt_uses_the_same_seed() {
    let (engine, provider, _) = setup(
        ScriptedProvider::new()
            .reply("hmm", 1, 1)
            .reply("NO", 1, 1),
    );

    engine.decide_message("wallet drained").await.unwrap();

    let expected = vec![ChatMessage::system(PROMPT), ChatMessage::user("wallet drained")];
    for request in provider.requests() {
        assert_eq!(request, expected);
    }
}

// ============================================================================
// 远端失败
// ============================================================================

#[tokio::test]
async fn test_remote_failure_is_distinct_error() {
    let (engine, _, state) = setup(ScriptedProvider::new().fail(ProviderError::Api {
        status: 500,
        message: "internal".to_string(),
    }));

    let result = engine.decide_message("help").await;
    assert!(matches!(result, Err(ProviderError::Api { status: 500, .. })));
    assert_eq!(state.ledger().lock().await.totals().classification, 0.0);
}
