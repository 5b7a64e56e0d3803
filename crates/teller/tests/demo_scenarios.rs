//! End-to-end runs of the bundled scenarios against the offline decider and
//! the simulated kiosk devices.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use decider::MockDecider;
use protocol::Input;
use teller::actions::KioskDispatcher;
use teller::scenarios::{self, DEMO_OTP};
use teller_core::session::Session;
use teller_core::{timers, Orchestrator};

fn engine(dispatcher: KioskDispatcher) -> Orchestrator<MockDecider, KioskDispatcher> {
    let rules = Arc::new(teller::load_rules().unwrap());
    let prompts = Arc::new(teller::load_prompts().unwrap());
    Orchestrator::new(rules, prompts, MockDecider::new(), dispatcher)
}

fn demo_dispatcher() -> KioskDispatcher {
    KioskDispatcher {
        fixed_otp: Some(DEMO_OTP.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn happy_path_reaches_done() {
    let engine = engine(demo_dispatcher());
    let session = scenarios::run(&engine, scenarios::happy()).await.unwrap();

    assert_eq!(session.state, "DONE");
    assert_eq!(session.ctx.get_int("otp_fail"), Some(0));
    // Pickup was confirmed, so its retraction timer is gone.
    assert!(session.ctx.timers.is_empty());
}

#[tokio::test]
async fn stockout_detours_through_branch_select() {
    let dispatcher = KioskDispatcher {
        stock_ok: false,
        ..demo_dispatcher()
    };
    let engine = engine(dispatcher);
    let session = scenarios::run(&engine, scenarios::stockout()).await.unwrap();

    assert_eq!(session.state, "DONE");
    assert!(session.ctx.get("branch_suggested").unwrap().truthy());
}

#[tokio::test]
async fn unclaimed_card_is_retracted_on_timeout() {
    let engine = engine(demo_dispatcher());
    let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
    let mut session = Session::new("CARD_PICKUP", t0);
    timers::set(&mut session.ctx, "CARD_PICKUP", 60, t0);

    session.now = t0 + Duration::seconds(61);
    engine.tick(&mut session, None).await.unwrap();

    assert_eq!(session.state, "RETRACTED");
    assert!(
        !session.ctx.timers.contains_key("CARD_PICKUP"),
        "consumed pickup timer is cleared"
    );
    // The retraction device reported back.
    assert_eq!(session.input, Input::system("timeout_retract"));
}

#[tokio::test]
async fn wrong_codes_exhaust_retries() {
    let engine = engine(demo_dispatcher());
    let session = scenarios::run(&engine, scenarios::otp_wrong()).await.unwrap();

    assert_eq!(session.state, "FAILED");
    assert_eq!(session.ctx.get_int("otp_fail"), Some(4));
}
