//! Binding tests, run with `wasm-pack test --node`.

#![cfg(target_arch = "wasm32")]

use team_balancer::BalanceEngine;
use wasm_bindgen_test::*;

fn participant(id: u64, side: &str, score: i32) -> String {
    format!(
        r#"{{ "id": {id}, "name": "p{id}", "side": "{side}", "counters": {{ "score": {score} }} }}"#
    )
}

#[wasm_bindgen_test]
fn engine_balances_after_round_start() {
    let mut engine = BalanceEngine::new_with_config(
        42,
        r#"{ "skill_metric": "score", "min_participants": 4, "min_rounds_before_switch": 0, "balance_triggers": ["round_start"] }"#,
    )
    .unwrap();
    for id in 1..=6 {
        engine.upsert_participant(&participant(id, "a", id as i32)).unwrap();
    }

    let outcome: serde_json::Value = serde_json::from_str(&engine.round_start().unwrap()).unwrap();
    assert!(outcome["moved_for_size"].as_u64().unwrap() >= 2);

    let state: serde_json::Value = serde_json::from_str(&engine.get_state()).unwrap();
    let (a, b) = (state["size_a"].as_u64().unwrap(), state["size_b"].as_u64().unwrap());
    assert!(a.abs_diff(b) <= 1);
}

#[wasm_bindgen_test]
fn engine_rejects_bad_input() {
    let mut engine = BalanceEngine::new(1);
    assert!(engine.upsert_participant("not json").is_err());
    assert!(engine.request_join(1, "a").is_err());
    assert!(engine.round_end("purple").is_err());
    assert!(BalanceEngine::new_with_config(1, "{").is_err());
}

#[wasm_bindgen_test]
fn clamping_warnings_are_returned() {
    let mut engine = BalanceEngine::new(1);
    let warnings = engine
        .update_config(r#"{ "boost": { "percentage": 400 } }"#)
        .unwrap();
    assert!(warnings.contains("boost.percentage"));
}
