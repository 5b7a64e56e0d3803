//! Demo action dispatcher: UI and TTS actions only log, API actions talk to
//! the simulated kiosk devices and may emit the signal that drives the next
//! tick. Device behavior is configurable so scenarios and tests can force
//! stock-outs or printer failures.

use async_trait::async_trait;
use protocol::{Action, ActionKind, ActionOutcome};
use rand::Rng;
use teller_core::ports::ActionPort;
use teller_core::session::Context;
use tracing::{info, warn};

use crate::config::env_or;

const OTP_EXPECTED_KEY: &str = "otp_expected";

#[derive(Debug, Clone)]
pub struct KioskDispatcher {
    pub stock_ok: bool,
    pub print_ok: bool,
    pub fixed_otp: Option<String>,
    pub otp_length: usize,
}

impl Default for KioskDispatcher {
    fn default() -> Self {
        KioskDispatcher {
            stock_ok: true,
            print_ok: true,
            fixed_otp: None,
            otp_length: 6,
        }
    }
}

impl KioskDispatcher {
    pub fn from_env() -> Self {
        KioskDispatcher {
            stock_ok: env_or("TELLER_STOCK", "ok") == "ok",
            print_ok: env_or("TELLER_PRINT", "ok") == "ok",
            fixed_otp: std::env::var("TELLER_OTP_FIXED").ok(),
            otp_length: env_or("TELLER_OTP_LENGTH", "6").parse().unwrap_or(6),
        }
    }

    fn gen_otp(&self) -> String {
        match &self.fixed_otp {
            Some(otp) => otp.clone(),
            None => {
                let mut rng = rand::thread_rng();
                (0..self.otp_length)
                    .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
                    .collect()
            }
        }
    }

    fn api(&self, action: &Action, ctx: &mut Context) -> ActionOutcome {
        match action.name.as_str() {
            "check_card_stock" => {
                info!(stock_ok = self.stock_ok, "API.check_card_stock");
                if self.stock_ok {
                    ActionOutcome::signal("stock_ok")
                } else {
                    ActionOutcome::signal("stock_out")
                }
            }
            "send_otp" | "resend_otp" => {
                let otp = if action.name == "resend_otp" {
                    ctx.get_str(OTP_EXPECTED_KEY)
                        .map(str::to_string)
                        .unwrap_or_else(|| self.gen_otp())
                } else {
                    self.gen_otp()
                };
                info!(name = %action.name, "API.{} -> sent (demo)", action.name);
                ctx.set(OTP_EXPECTED_KEY, otp.as_str());
                ActionOutcome::none()
            }
            "verify_otp" => {
                let submitted = action
                    .args
                    .get("otp")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                let expected = ctx.get_str(OTP_EXPECTED_KEY).unwrap_or("");
                // No code on file: accept any plausible length (demo only).
                let ok = if expected.is_empty() {
                    matches!(submitted.len(), 4 | 6)
                } else {
                    submitted == expected
                };
                info!(ok, "API.verify_otp");
                if ok {
                    ActionOutcome::signal("otp_ok")
                } else {
                    ActionOutcome::signal("otp_wrong")
                }
            }
            "print_card" => {
                info!(print_ok = self.print_ok, "API.print_card");
                if self.print_ok {
                    ActionOutcome::signal("printed")
                } else {
                    ActionOutcome::signal("print_fail")
                }
            }
            "retract_card" => {
                info!("API.retract_card");
                ActionOutcome::signal("timeout_retract")
            }
            "print_receipt" => {
                info!("API.print_receipt");
                ActionOutcome::none()
            }
            other => {
                warn!(name = %other, args = ?action.args, "API unknown action");
                ActionOutcome::none()
            }
        }
    }
}

#[async_trait]
impl ActionPort for KioskDispatcher {
    async fn dispatch(&self, action: &Action, ctx: &mut Context) -> ActionOutcome {
        match action.kind {
            ActionKind::Ui => {
                info!(name = %action.name, args = ?action.args, "UI");
                ActionOutcome::none()
            }
            ActionKind::Tts => {
                let text = action.args.get("text").and_then(|v| v.as_str()).unwrap_or("");
                info!(%text, "TTS.speak");
                ActionOutcome::none()
            }
            ActionKind::Api => self.api(action, ctx),
            ActionKind::Clock => {
                // The engine intercepts clock actions; reaching here is a
                // rule-table mistake.
                warn!(name = %action.name, "clock action reached the dispatcher");
                ActionOutcome::none()
            }
        }
    }
}
