//! Offline decision provider for the demo and tests: a deterministic
//! keyword table instead of a remote model, same contract.

use async_trait::async_trait;
use protocol::{Decision, DecisionResponse, Input, PromptConfig};
use serde_json::json;
use teller_core::ports::DecisionPort;
use teller_core::session::Context;

#[derive(Debug, Default)]
pub struct MockDecider;

impl MockDecider {
    pub fn new() -> Self {
        MockDecider
    }

    fn classify(state: &str, payload: &str) -> Decision {
        let text = payload.to_lowercase();
        let digits = !payload.is_empty() && payload.chars().all(|c| c.is_ascii_digit());

        match state {
            "START" => {
                if text.contains("card") || text.contains("reissue") || text.contains("lost") {
                    Decision {
                        intent: "reissue_card".into(),
                        params: Default::default(),
                        response: DecisionResponse::text("Let's reissue your card. Please look at the camera."),
                        meta: Default::default(),
                    }
                } else {
                    Self::others("I can help you reissue a card. What would you like to do?")
                }
            }
            "OTP" => {
                if digits {
                    let mut decision = Decision {
                        intent: "provide_otp".into(),
                        params: Default::default(),
                        response: DecisionResponse::text("Checking your code."),
                        meta: Default::default(),
                    };
                    decision.params.insert("otp".into(), json!(payload));
                    decision
                } else if text.contains("resend") || text.contains("again") {
                    Decision {
                        intent: "resend_otp".into(),
                        params: Default::default(),
                        response: DecisionResponse::text("Sending a new code."),
                        meta: Default::default(),
                    }
                } else if text.contains("cancel") || text.contains("stop") {
                    Decision::cancel("Cancelling the transaction.")
                } else {
                    Self::others("Please read out the 6-digit code we sent you.")
                }
            }
            "DONE" => {
                let intent = if text.contains("no") {
                    "print_receipt_no"
                } else if text.contains("yes") || text.contains("receipt") {
                    "print_receipt_yes"
                } else {
                    "print_receipt_no"
                };
                Decision {
                    intent: intent.into(),
                    params: Default::default(),
                    response: DecisionResponse::text("Thank you for visiting."),
                    meta: Default::default(),
                }
            }
            _ => {
                if text.contains("cancel") || text.contains("stop") {
                    Decision::cancel("Cancelling the transaction.")
                } else {
                    Self::others("Sorry, I did not catch that.")
                }
            }
        }
    }

    fn others(content: &str) -> Decision {
        Decision {
            intent: "others".into(),
            params: Default::default(),
            response: DecisionResponse::text(content),
            meta: Default::default(),
        }
    }
}

#[async_trait]
impl DecisionPort for MockDecider {
    async fn decide(
        &self,
        state: &str,
        allowed_intents: &[String],
        input: &Input,
        _prompt: &PromptConfig,
        _ctx: &Context,
    ) -> Decision {
        let mut decision = Self::classify(state, &input.payload);
        if !allowed_intents.is_empty()
            && decision.intent != "cancel"
            && !allowed_intents.contains(&decision.intent)
        {
            decision.intent = "cancel".into();
        }
        decision
    }
}
