//! Ports the engine talks through. Implementations live in adapter crates;
//! tests use the in-crate mocks.

use crate::session::Context;
use async_trait::async_trait;
use protocol::{Action, ActionOutcome, Decision, Input, PromptConfig};

/// Remote decision provider. Must never fail: every transport, parse, or
/// validation problem degrades into a well-formed (usually `cancel`)
/// decision, with diagnostics in `meta`.
#[async_trait]
pub trait DecisionPort: Send + Sync {
    async fn decide(
        &self,
        state: &str,
        allowed_intents: &[String],
        input: &Input,
        prompt: &PromptConfig,
        ctx: &Context,
    ) -> Decision;
}

/// Side-effect executor for UI/TTS/API actions. `clock` actions never reach
/// it; the engine intercepts those. Dispatch is black-box I/O: failures are
/// the dispatcher's to absorb, the engine only consumes the outcome signal.
#[async_trait]
pub trait ActionPort: Send + Sync {
    async fn dispatch(&self, action: &Action, ctx: &mut Context) -> ActionOutcome;
}
