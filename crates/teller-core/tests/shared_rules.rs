//! Two independently-owned sessions driven against one shared rule table
//! must produce fully independent transition sequences.

use chrono::{TimeZone, Utc};
use protocol::{Decision, Input};
use std::sync::Arc;
use teller_core::mocks::{RecordingDispatcher, StaticDecider};
use teller_core::rules::{PromptSet, RuleTable};
use teller_core::session::Session;
use teller_core::Orchestrator;

const TABLE: &str = r#"{
    "states": {
        "OTP": {
            "otp_wrong": {
                "guard": "otp_fail < 2",
                "after": "otp_fail += 1",
                "actions": [],
                "fallback": {"to": "FAILED", "actions": []}
            },
            "otp_ok": {"to": "PRINTING", "actions": []}
        },
        "PRINTING": {}
    }
}"#;

#[tokio::test]
async fn sessions_do_not_observe_each_other() {
    let rules = Arc::new(RuleTable::from_json(TABLE).unwrap());
    let engine = Arc::new(Orchestrator::new(
        rules.clone(),
        Arc::new(PromptSet::new()),
        StaticDecider::new(Decision::no_op()),
        RecordingDispatcher::new(),
    ));
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();

    let happy_engine = engine.clone();
    let happy = tokio::spawn(async move {
        let mut s = Session::new("OTP", now);
        s.ctx.set("otp_fail", 0i64);
        happy_engine
            .tick(&mut s, Some(Input::system("otp_ok")))
            .await
            .unwrap();
        s
    });

    let unlucky_engine = engine.clone();
    let unlucky = tokio::spawn(async move {
        let mut s = Session::new("OTP", now);
        s.ctx.set("otp_fail", 0i64);
        for _ in 0..3 {
            unlucky_engine
                .tick(&mut s, Some(Input::system("otp_wrong")))
                .await
                .unwrap();
        }
        s
    });

    let happy = happy.await.unwrap();
    let unlucky = unlucky.await.unwrap();

    assert_eq!(happy.state, "PRINTING");
    assert_eq!(happy.ctx.get_int("otp_fail"), Some(0));

    assert_eq!(unlucky.state, "FAILED");
    assert_eq!(unlucky.ctx.get_int("otp_fail"), Some(2));

    assert_ne!(happy.id, unlucky.id);
    // The shared table saw both sessions and is untouched.
    assert_eq!(rules.rules_for("OTP").unwrap().len(), 2);
}
