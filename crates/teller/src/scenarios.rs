//! Canned demo scenarios plus the session loop that drives them. Each
//! scenario is a script of (state, input) pairs; a step is fed only when the
//! session has reached its state and carries no queued signal, so the loop
//! never races the engine's own feedback.

use anyhow::{bail, Result};
use chrono::Utc;
use protocol::Input;
use std::collections::VecDeque;
use teller_core::ports::{ActionPort, DecisionPort};
use teller_core::session::Session;
use teller_core::Orchestrator;
use tracing::info;

/// OTP the demo dispatcher is configured to expect, so the scripted
/// utterance below actually verifies.
pub const DEMO_OTP: &str = "482913";

const MAX_STEPS: usize = 100;

/// One scripted external event: fed when the session reaches `state`.
#[derive(Debug, Clone)]
pub struct Step {
    pub state: &'static str,
    pub input: Input,
}

impl Step {
    fn new(state: &'static str, input: Input) -> Self {
        Step { state, input }
    }
}

pub fn by_name(name: &str) -> Option<Vec<Step>> {
    match name {
        "happy" => Some(happy()),
        "stockout" => Some(stockout()),
        "otp_wrong" => Some(otp_wrong()),
        _ => None,
    }
}

/// Straight-through reissuance: stock available, OTP right the first time.
pub fn happy() -> Vec<Step> {
    let mut steps = front_half();
    steps.push(Step::new("OTP", Input::voice(DEMO_OTP)));
    steps.extend(back_half());
    steps
}

/// The kiosk is out of card stock; the customer picks a branch for pickup.
pub fn stockout() -> Vec<Step> {
    let mut steps = front_half();
    steps.push(Step::new("BRANCH_SELECT", Input::system("confirm_branch")));
    steps.push(Step::new("OTP", Input::voice(DEMO_OTP)));
    steps.extend(back_half());
    steps
}

/// Five wrong codes in a row exhaust the retry budget.
pub fn otp_wrong() -> Vec<Step> {
    let mut steps = front_half();
    for _ in 0..5 {
        steps.push(Step::new("OTP", Input::voice("111111")));
    }
    steps
}

/// Shared opening: spoken request, then the device checkpoints up to the
/// stock check.
fn front_half() -> Vec<Step> {
    vec![
        Step::new("START", Input::voice("I lost my card, I need a new one")),
        Step::new("FACE", Input::system("face_ok")),
        Step::new("ID_SCAN", Input::system("id_ok")),
        Step::new("NFC_READ", Input::system("nfc_ok")),
        Step::new("CARD_SELECT", Input::touch("select_card_type")),
        Step::new("ACCOUNT_SELECT", Input::touch("select_account")),
    ]
}

fn back_half() -> Vec<Step> {
    vec![
        Step::new("CARD_PICKUP", Input::system("card_taken")),
        Step::new("DONE", Input::voice("no receipt, thanks")),
    ]
}

/// Drive one session through a script until it settles: terminal with no
/// step left for its state, or simply waiting on input the script does not
/// provide. Ticks happen only when there is something to consume, so a
/// device-driven state never sees an empty-input tick.
pub async fn run<D, A>(engine: &Orchestrator<D, A>, script: Vec<Step>) -> Result<Session>
where
    D: DecisionPort,
    A: ActionPort,
{
    let mut session = Session::new("START", Utc::now());
    session.ctx.set("otp_fail", 0i64);
    session.ctx.set("id_retry", 0i64);
    session.ctx.set("face_retry", 0i64);
    session.ctx.set("branch_suggested", false);
    session.ctx.set("risk_flag", false);

    let mut script: VecDeque<Step> = script.into();
    for _ in 0..MAX_STEPS {
        session.now = Utc::now();

        if session.input.is_empty() {
            if let Some(step) = script.front() {
                if step.state == session.state {
                    if let Some(step) = script.pop_front() {
                        session.feed(step.input);
                    }
                }
            }
        }

        let has_work = !session.input.is_empty() || engine.rules().has_auto(&session.state);
        if !has_work {
            break;
        }

        engine.tick(&mut session, None).await?;
        if !session.response.content.is_empty() {
            info!(state = %session.state, "kiosk: {}", session.response.content);
        }
        if session.is_terminal() && script.front().map_or(true, |s| s.state != session.state) {
            break;
        }
    }

    if !script.is_empty() {
        bail!(
            "scenario stalled in state {} with {} scripted step(s) left",
            session.state,
            script.len()
        );
    }
    Ok(session)
}
