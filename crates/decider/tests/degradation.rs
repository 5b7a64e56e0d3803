//! Transport-level degradation: an unreachable endpoint must still produce
//! a well-formed cancel decision, never an error.

use decider::{DeciderConfig, HttpDecider};
use protocol::{Input, PromptConfig, ResponseKind};
use std::time::Duration;
use teller_core::ports::DecisionPort;
use teller_core::session::Context;

#[tokio::test]
async fn unreachable_endpoint_degrades_to_cancel() {
    // Discard-protocol port; nothing listens there.
    let mut cfg = DeciderConfig::new("http://127.0.0.1:9/query");
    cfg.timeout = Duration::from_millis(250);
    cfg.max_attempts = 2;
    cfg.backoff_base = Duration::from_millis(10);
    cfg.backoff_cap = Duration::from_millis(20);
    let decider = HttpDecider::new(cfg).unwrap();

    let decision = decider
        .decide(
            "OTP",
            &["provide_otp".into(), "cancel".into()],
            &Input::voice("482913"),
            &PromptConfig::default(),
            &Context::new(),
        )
        .await;

    assert_eq!(decision.intent, "cancel");
    assert_eq!(decision.response.kind, ResponseKind::Text);
    assert!(!decision.response.content.is_empty());
    assert!(decision.meta.contains_key("error"));
    assert!(decision.meta["trace_id"]
        .as_str()
        .unwrap()
        .starts_with("http-ex-"));
}
