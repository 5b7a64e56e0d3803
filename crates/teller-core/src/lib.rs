pub mod guard;
pub mod ports;
pub mod rules;
pub mod session;
pub mod timers;

use anyhow::Result;
use ports::{ActionPort, DecisionPort};
use protocol::{Action, ActionKind, Decision, DecisionResponse, Input};
use rules::{PromptSet, Rule, RuleTable};
use serde_json::Value;
use session::{Context, Session};
use std::sync::Arc;
use tracing::{debug, warn};

/// State forced when no rule resolves for the current signal/intent.
pub const FAILED_STATE: &str = "FAILED";

/// Headless tick engine: one deterministic step per invocation, composed of
/// the four phases check-timeouts, think, decide, run-actions. Holds only
/// shared read-only configuration plus the two ports, so one engine serves
/// arbitrarily many independently-owned sessions.
pub struct Orchestrator<D: DecisionPort, A: ActionPort> {
    rules: Arc<RuleTable>,
    prompts: Arc<PromptSet>,
    decider: D,
    dispatcher: A,
}

impl<D: DecisionPort, A: ActionPort> Orchestrator<D, A> {
    pub fn new(rules: Arc<RuleTable>, prompts: Arc<PromptSet>, decider: D, dispatcher: A) -> Self {
        Self {
            rules,
            prompts,
            decider,
            dispatcher,
        }
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    pub fn decider(&self) -> &D {
        &self.decider
    }

    pub fn dispatcher(&self) -> &A {
        &self.dispatcher
    }

    /// Run exactly one tick. `Some(input)` replaces the session's pending
    /// input; `None` consumes whatever the previous tick queued (a fed-back
    /// system signal, or nothing). The engine never loops and never caps
    /// step counts; both belong to the caller.
    pub async fn tick(&self, session: &mut Session, input: Option<Input>) -> Result<()> {
        if let Some(input) = input {
            session.input = input;
        }
        self.check_timeouts(session);
        self.think(session).await;
        let actions = self.decide(session);
        self.run_actions(session, actions).await;
        Ok(())
    }

    /// Phase 1: reconcile policy-coupled timers with the current state, then
    /// surface at most one expired timer as this tick's system signal.
    fn check_timeouts(&self, session: &mut Session) {
        let now = session.now;
        for policy in &self.rules.timer_policies {
            let armed = session.ctx.timers.contains_key(&policy.timer);
            if policy.state == session.state {
                if policy.arm_on_enter && !armed {
                    if let Some(secs) = self.rules.timer_secs(&policy.timer) {
                        timers::set(&mut session.ctx, &policy.timer, secs, now);
                    }
                }
            } else if policy.clear_on_exit && armed {
                timers::clear(&mut session.ctx, &policy.timer);
            }
        }

        if let Some(name) = timers::check_expired(&session.ctx, now) {
            let signal = self
                .rules
                .timeout_signal(&name)
                .map(str::to_string)
                .unwrap_or_else(|| format!("_timeout_{name}"));
            debug!(session = %session.id, timer = %name, %signal, "timer expired");
            session.input = Input::system(signal);
            timers::clear(&mut session.ctx, &name);
        }
    }

    /// Phase 2: consult the decision provider, unless the state is
    /// device-driven, in which case a neutral decision is synthesized.
    async fn think(&self, session: &mut Session) {
        if self.rules.is_device_driven(&session.state) {
            session.decision = Some(Decision::no_op());
            session.response = DecisionResponse::none();
            return;
        }

        let allowed = self.rules.allowed_intents(&session.state);
        let prompt = self
            .prompts
            .get(&session.state)
            .cloned()
            .unwrap_or_default();
        let decision = self
            .decider
            .decide(&session.state, &allowed, &session.input, &prompt, &session.ctx)
            .await;
        debug!(session = %session.id, state = %session.state, intent = %decision.intent, "decision");
        session.response = decision.response.clone();
        session.decision = Some(decision);
    }

    /// Phase 3: resolve the transition and move the session, returning the
    /// actions to dispatch. Resolution order: explicit signal, decision
    /// intent, `_auto`, then hard failure.
    fn decide(&self, session: &mut Session) -> Vec<Action> {
        let state = session.state.clone();
        let signal = session.input.signal.as_deref();
        let intent = session
            .decision
            .as_ref()
            .map(|d| d.intent.as_str())
            .unwrap_or("");

        let rule = self.resolve_rule(&state, signal, intent);
        let Some(rule) = rule else {
            warn!(session = %session.id, %state, ?signal, %intent, "no matching transition");
            self.enter_state(session, FAILED_STATE.to_string());
            return vec![Action::ui("back_home")];
        };

        if let Some(expr) = &rule.guard {
            let passed = guard::evaluate(expr, &session.ctx).unwrap_or_else(|err| {
                warn!(session = %session.id, %state, guard = %expr, %err, "guard evaluation failed");
                false
            });
            if !passed {
                if let Some(fallback) = &rule.fallback {
                    let target = fallback.to.clone().unwrap_or_else(|| state.clone());
                    let actions = fallback.actions.clone();
                    self.enter_state(session, target);
                    return actions;
                }
                // Soft retry: stay put, still run the primary actions,
                // and never apply the after-effect.
                return rule.actions.clone();
            }
        }

        if let Some(expr) = &rule.after {
            if let Err(err) = guard::apply(expr, &mut session.ctx) {
                warn!(session = %session.id, %state, after = %expr, %err, "after-effect failed");
            }
        }

        let target = rule.to.clone().unwrap_or_else(|| state.clone());
        let actions = rule.actions.clone();
        self.enter_state(session, target);
        actions
    }

    fn resolve_rule(&self, state: &str, signal: Option<&str>, intent: &str) -> Option<&Rule> {
        let state_rules = self.rules.rules_for(state)?;
        signal
            .and_then(|s| state_rules.get(s))
            .or_else(|| state_rules.get(intent))
            .or_else(|| state_rules.get(rules::AUTO_KEY))
    }

    /// Apply a state change together with its timer policy edges: clear the
    /// departed state's clear-on-exit timers, arm the entered state's
    /// arm-on-enter timers.
    fn enter_state(&self, session: &mut Session, target: String) {
        if target == session.state {
            return;
        }
        let now = session.now;
        for policy in &self.rules.timer_policies {
            if policy.state == session.state && policy.clear_on_exit {
                timers::clear(&mut session.ctx, &policy.timer);
            }
            if policy.state == target && policy.arm_on_enter {
                if let Some(secs) = self.rules.timer_secs(&policy.timer) {
                    timers::set(&mut session.ctx, &policy.timer, secs, now);
                }
            }
        }
        debug!(session = %session.id, from = %session.state, to = %target, "transition");
        session.state = target;
    }

    /// Phase 4: dispatch the actions. `clock`/`start_timer` arms a timer
    /// directly; any other action may emit a signal, and the last one wins
    /// as the next tick's input.
    async fn run_actions(&self, session: &mut Session, actions: Vec<Action>) {
        let now = session.now;
        let mut emitted: Option<String> = None;

        for action in &actions {
            if action.kind == ActionKind::Clock && action.name == "start_timer" {
                let timer = action.args.get("timer").and_then(Value::as_str);
                let secs = action.args.get("secs").and_then(Value::as_u64).unwrap_or(0);
                match timer {
                    Some(timer) if secs > 0 => timers::set(&mut session.ctx, timer, secs, now),
                    _ => warn!(session = %session.id, args = ?action.args, "bad start_timer args"),
                }
                continue;
            }

            let resolved = self.resolve_args(action, session);
            let outcome = self.dispatcher.dispatch(&resolved, &mut session.ctx).await;
            if let Some(signal) = outcome.signal {
                emitted = Some(signal);
            }
        }

        if let Some(signal) = emitted {
            debug!(session = %session.id, %signal, "feeding back emitted signal");
            session.input = Input::system(signal);
            return;
        }

        // No signal: a matching rearm policy treats this turn as input
        // activity and resets its idle timer.
        for policy in &self.rules.timer_policies {
            if policy.state == session.state && policy.rearm_on == Some(session.input.channel) {
                if let Some(secs) = self.rules.timer_secs(&policy.timer) {
                    timers::set(&mut session.ctx, &policy.timer, secs, now);
                }
            }
        }
        session.input = Input::empty();
    }

    /// Resolve `$params.x` / `$ctx.x` string arguments against the current
    /// decision params and context before handing the action out.
    fn resolve_args(&self, action: &Action, session: &Session) -> Action {
        let mut resolved = action.clone();
        for (key, value) in resolved.args.iter_mut() {
            let Some(reference) = value.as_str().map(str::to_string) else {
                continue;
            };
            if let Some(name) = reference.strip_prefix("$params.") {
                *value = session
                    .decision
                    .as_ref()
                    .and_then(|d| d.params.get(name).cloned())
                    .unwrap_or(Value::Null);
            } else if let Some(name) = reference.strip_prefix("$ctx.") {
                *value = match session.ctx.get(name) {
                    Some(scalar) => serde_json::to_value(scalar).unwrap_or(Value::Null),
                    None => {
                        warn!(session = %session.id, arg = %key, field = %name, "unknown context field in action arg");
                        Value::Null
                    }
                };
            }
        }
        resolved
    }
}

/// In-crate mocks for tests and the offline demo.
pub mod mocks {
    use super::*;
    use async_trait::async_trait;
    use protocol::{ActionOutcome, PromptConfig};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Always returns a clone of the same decision, counting calls so tests
    /// can assert the device-driven bypass.
    pub struct StaticDecider {
        decision: Decision,
        pub calls: AtomicUsize,
    }

    impl StaticDecider {
        pub fn new(decision: Decision) -> Self {
            Self {
                decision,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DecisionPort for StaticDecider {
        async fn decide(
            &self,
            _state: &str,
            _allowed: &[String],
            _input: &Input,
            _prompt: &PromptConfig,
            _ctx: &Context,
        ) -> Decision {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.decision.clone()
        }
    }

    /// Records every dispatched action and answers from a name -> signal map.
    #[derive(Default)]
    pub struct RecordingDispatcher {
        pub log: Mutex<Vec<Action>>,
        pub signals: HashMap<String, String>,
    }

    impl RecordingDispatcher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_signal(mut self, action: &str, signal: &str) -> Self {
            self.signals.insert(action.to_string(), signal.to_string());
            self
        }

        pub fn dispatched(&self) -> Vec<Action> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ActionPort for RecordingDispatcher {
        async fn dispatch(&self, action: &Action, _ctx: &mut Context) -> ActionOutcome {
            self.log.lock().unwrap().push(action.clone());
            match self.signals.get(&action.name) {
                Some(signal) => ActionOutcome::signal(signal.clone()),
                None => ActionOutcome::none(),
            }
        }
    }
}
