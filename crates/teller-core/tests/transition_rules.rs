//! Transition resolution contracts: guard pass, guard fail with and without
//! fallback, and the hard unmatched-transition failure.

use chrono::{TimeZone, Utc};
use protocol::{ActionKind, Decision, DecisionResponse, Input};
use std::sync::Arc;
use teller_core::mocks::{RecordingDispatcher, StaticDecider};
use teller_core::rules::{PromptSet, RuleTable};
use teller_core::session::Session;
use teller_core::{Orchestrator, FAILED_STATE};

const TABLE: &str = r#"{
    "states": {
        "OTP": {
            "otp_wrong": {
                "guard": "otp_fail < 4",
                "after": "otp_fail += 1",
                "actions": [{"type": "tts", "name": "say", "args": {"text": "wrong code"}}],
                "fallback": {
                    "to": "FAILED",
                    "actions": [{"type": "ui", "name": "back_home"}]
                }
            },
            "retry_hint": {
                "guard": "otp_fail < 1",
                "after": "otp_fail += 1",
                "actions": [{"type": "tts", "name": "say", "args": {"text": "try again"}}]
            },
            "otp_ok": {
                "to": "PRINTING",
                "actions": [{"type": "api", "name": "print_card"}]
            }
        },
        "PRINTING": {}
    }
}"#;

fn engine() -> Orchestrator<StaticDecider, RecordingDispatcher> {
    let rules = Arc::new(RuleTable::from_json(TABLE).unwrap());
    let decider = StaticDecider::new(Decision {
        intent: "_none".into(),
        params: Default::default(),
        response: DecisionResponse::none(),
        meta: Default::default(),
    });
    Orchestrator::new(rules, Arc::new(PromptSet::new()), decider, RecordingDispatcher::new())
}

fn session() -> Session {
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
    let mut s = Session::new("OTP", now);
    s.ctx.set("otp_fail", 0i64);
    s
}

#[tokio::test]
async fn guard_pass_applies_after_effect_and_moves() {
    let engine = engine();
    let mut s = session();

    engine
        .tick(&mut s, Some(Input::system("otp_ok")))
        .await
        .unwrap();

    assert_eq!(s.state, "PRINTING");
    let dispatched = engine_log(&engine);
    assert_eq!(dispatched.len(), 1);
    assert_eq!(dispatched[0].name, "print_card");
    assert_eq!(dispatched[0].kind, ActionKind::Api);
}

#[tokio::test]
async fn guard_pass_runs_after_effect_exactly_once() {
    let engine = engine();
    let mut s = session();

    engine
        .tick(&mut s, Some(Input::system("otp_wrong")))
        .await
        .unwrap();

    assert_eq!(s.state, "OTP");
    assert_eq!(s.ctx.get_int("otp_fail"), Some(1));
}

#[tokio::test]
async fn guard_fail_without_fallback_stays_with_primary_actions() {
    let engine = engine();
    let mut s = session();
    s.ctx.set("otp_fail", 3i64); // retry_hint guard wants < 1

    engine
        .tick(&mut s, Some(Input::system("retry_hint")))
        .await
        .unwrap();

    assert_eq!(s.state, "OTP", "soft retry keeps the state");
    assert_eq!(
        s.ctx.get_int("otp_fail"),
        Some(3),
        "after-effect must not run on guard failure"
    );
    let dispatched = engine_log(&engine);
    assert_eq!(dispatched.len(), 1);
    assert_eq!(dispatched[0].name, "say", "primary actions still run");
}

#[tokio::test]
async fn guard_fail_with_fallback_takes_fallback_transition() {
    let engine = engine();
    let mut s = session();
    s.ctx.set("otp_fail", 4i64);

    engine
        .tick(&mut s, Some(Input::system("otp_wrong")))
        .await
        .unwrap();

    assert_eq!(s.state, FAILED_STATE);
    assert_eq!(
        s.ctx.get_int("otp_fail"),
        Some(4),
        "after-effect must not run on the fallback path"
    );
    let dispatched = engine_log(&engine);
    assert_eq!(dispatched.len(), 1);
    assert_eq!(dispatched[0].name, "back_home");
}

#[tokio::test]
async fn broken_guard_counts_as_false() {
    let rules: &str = r#"{
        "states": {
            "OTP": {
                "go": {
                    "guard": "no_such_field < 1",
                    "to": "PRINTING",
                    "fallback": {"to": "FAILED", "actions": []}
                }
            }
        }
    }"#;
    let engine = Orchestrator::new(
        Arc::new(RuleTable::from_json(rules).unwrap()),
        Arc::new(PromptSet::new()),
        StaticDecider::new(Decision::no_op()),
        RecordingDispatcher::new(),
    );
    let mut s = session();

    engine.tick(&mut s, Some(Input::system("go"))).await.unwrap();
    assert_eq!(s.state, FAILED_STATE);
}

#[tokio::test]
async fn unmatched_transition_fails_hard() {
    let engine = engine();
    let mut s = session();

    engine
        .tick(&mut s, Some(Input::system("no_such_signal")))
        .await
        .unwrap();

    assert_eq!(s.state, FAILED_STATE);
    let dispatched = engine_log(&engine);
    assert_eq!(dispatched.len(), 1);
    assert_eq!(dispatched[0].kind, ActionKind::Ui);
    assert_eq!(dispatched[0].name, "back_home");
}

fn engine_log(engine: &Orchestrator<StaticDecider, RecordingDispatcher>) -> Vec<protocol::Action> {
    engine.dispatcher().dispatched()
}
