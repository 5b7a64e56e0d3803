//! Rule table: state -> trigger key -> transition, plus the timeout table,
//! declarative per-state timer policies, and the device-driven state set.
//! Loaded once at startup, immutable afterwards, shared via `Arc` across
//! concurrent sessions. Reload is an atomic whole-table swap by the caller.

use anyhow::{Context as _, Result};
use protocol::{Action, Channel, PromptConfig};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Reserved trigger key selected when neither the signal nor the intent
/// matches. Underscore-prefixed keys never count as intents.
pub const AUTO_KEY: &str = "_auto";

/// Alternate transition taken when a rule's guard fails.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Fallback {
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub to: Option<String>,
}

/// One transition: optional guard, optional after-effect (applied only when
/// the guard passes), actions, target state (absent = stay), and an optional
/// fallback for guard failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Rule {
    #[serde(default)]
    pub guard: Option<String>,
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub fallback: Option<Fallback>,
}

/// A named timer's default duration and the system signal synthesized when
/// it expires.
#[derive(Debug, Clone, Deserialize)]
pub struct TimerSpec {
    pub secs: u64,
    pub signal: String,
}

/// Declarative state/timer coupling: arm on entering `state`, clear on
/// leaving it, and optionally re-arm whenever a tick in `state` consumed
/// input on the given channel (a spoken turn resets the idle clock).
#[derive(Debug, Clone, Deserialize)]
pub struct TimerPolicy {
    pub state: String,
    pub timer: String,
    #[serde(default)]
    pub arm_on_enter: bool,
    #[serde(default)]
    pub clear_on_exit: bool,
    #[serde(default)]
    pub rearm_on: Option<Channel>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleTable {
    pub states: HashMap<String, HashMap<String, Rule>>,
    #[serde(default)]
    pub timeouts: HashMap<String, TimerSpec>,
    #[serde(default)]
    pub timer_policies: Vec<TimerPolicy>,
    #[serde(default)]
    pub device_driven: HashSet<String>,
}

impl RuleTable {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("invalid rule table document")
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading rule table {}", path.display()))?;
        Self::from_json(&text)
    }

    pub fn rules_for(&self, state: &str) -> Option<&HashMap<String, Rule>> {
        self.states.get(state)
    }

    /// Intents allowed in `state`: the rule keys minus reserved
    /// (underscore-prefixed) triggers. Sorted so prompts are stable.
    pub fn allowed_intents(&self, state: &str) -> Vec<String> {
        let mut intents: Vec<String> = self
            .rules_for(state)
            .map(|rules| {
                rules
                    .keys()
                    .filter(|k| !k.starts_with('_'))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        intents.sort();
        intents
    }

    /// Device-driven states progress only on system signals; the decision
    /// provider is bypassed entirely for them.
    pub fn is_device_driven(&self, state: &str) -> bool {
        self.device_driven.contains(state)
    }

    /// Whether `state` has an `_auto` transition, i.e. a tick with no input
    /// still makes progress there.
    pub fn has_auto(&self, state: &str) -> bool {
        self.rules_for(state)
            .map(|rules| rules.contains_key(AUTO_KEY))
            .unwrap_or(false)
    }

    pub fn timer_secs(&self, timer: &str) -> Option<u64> {
        self.timeouts.get(timer).map(|spec| spec.secs)
    }

    pub fn timeout_signal(&self, timer: &str) -> Option<&str> {
        self.timeouts.get(timer).map(|spec| spec.signal.as_str())
    }
}

/// Per-state prompt configuration, passed opaquely to the decision provider.
pub type PromptSet = HashMap<String, PromptConfig>;

pub fn prompts_from_json(text: &str) -> Result<PromptSet> {
    serde_json::from_str(text).context("invalid prompt set document")
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "states": {
            "OTP": {
                "provide_otp": {"actions": [{"type": "api", "name": "verify_otp"}]},
                "resend_otp": {"actions": [{"type": "api", "name": "resend_otp"}]},
                "cancel": {"to": "FAILED"},
                "_timeout_no_input": {"to": "FAILED"},
                "otp_ok": {"to": "PRINTING"}
            },
            "OTP_SEND": {
                "_auto": {"to": "OTP", "actions": [{"type": "api", "name": "send_otp"}]}
            }
        },
        "timeouts": {
            "OTP_no_input": {"secs": 30, "signal": "_timeout_no_input"}
        },
        "timer_policies": [
            {"state": "OTP", "timer": "OTP_no_input",
             "arm_on_enter": true, "clear_on_exit": true, "rearm_on": "voice"}
        ],
        "device_driven": ["OTP_SEND"]
    }"#;

    #[test]
    fn parses_and_resolves() {
        let table = RuleTable::from_json(DOC).unwrap();
        assert!(table.rules_for("OTP").unwrap().contains_key("provide_otp"));
        assert!(table.is_device_driven("OTP_SEND"));
        assert!(!table.is_device_driven("OTP"));
        assert_eq!(table.timer_secs("OTP_no_input"), Some(30));
        assert_eq!(table.timeout_signal("OTP_no_input"), Some("_timeout_no_input"));
    }

    #[test]
    fn allowed_intents_skip_reserved_keys() {
        let table = RuleTable::from_json(DOC).unwrap();
        assert_eq!(
            table.allowed_intents("OTP"),
            vec!["cancel", "otp_ok", "provide_otp", "resend_otp"]
        );
        assert_eq!(table.allowed_intents("OTP_SEND"), Vec::<String>::new());
        assert_eq!(table.allowed_intents("NOPE"), Vec::<String>::new());
    }

    #[test]
    fn rule_defaults() {
        let rule: Rule = serde_json::from_str(r#"{"to": "DONE"}"#).unwrap();
        assert!(rule.guard.is_none());
        assert!(rule.actions.is_empty());
        assert_eq!(rule.to.as_deref(), Some("DONE"));
    }
}
