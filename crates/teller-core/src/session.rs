use chrono::{DateTime, Utc};
use protocol::{Decision, DecisionResponse, Input};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// States that end a session; the caller stops ticking on reaching one.
pub const TERMINAL_STATES: [&str; 3] = ["DONE", "FAILED", "RETRACTED"];

/// A scalar context value visible to guard expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    pub fn truthy(&self) -> bool {
        match self {
            Scalar::Bool(b) => *b,
            Scalar::Int(n) => *n != 0,
            Scalar::Float(f) => *f != 0.0,
            Scalar::Str(s) => !s.is_empty(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(n) => Some(*n as f64),
            Scalar::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Str(v.to_string())
    }
}

/// Per-session context: a guard-visible scalar map plus the engine-owned
/// timer map (name -> absolute expiry). Timers live in a `BTreeMap` so
/// expiry resolution is deterministic when several are due at once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    #[serde(default)]
    pub fields: HashMap<String, Scalar>,
    #[serde(default)]
    pub timers: BTreeMap<String, DateTime<Utc>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Scalar> {
        self.fields.get(name)
    }

    pub fn set<V: Into<Scalar>>(&mut self, name: &str, value: V) {
        self.fields.insert(name.to_string(), value.into());
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.fields.get(name) {
            Some(Scalar::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.fields.get(name) {
            Some(Scalar::Int(n)) => Some(*n),
            _ => None,
        }
    }
}

/// One in-flight transaction. Exclusively owned by its calling loop; the
/// engine borrows it for the duration of a single tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub state: String,
    pub ctx: Context,
    pub input: Input,
    pub decision: Option<Decision>,
    pub response: DecisionResponse,
    pub now: DateTime<Utc>,
}

impl Session {
    pub fn new(initial_state: &str, now: DateTime<Utc>) -> Self {
        Session {
            id: Uuid::new_v4(),
            state: initial_state.to_string(),
            ctx: Context::new(),
            input: Input::empty(),
            decision: None,
            response: DecisionResponse::none(),
            now,
        }
    }

    /// Queue the next external input without ticking.
    pub fn feed(&mut self, input: Input) {
        self.input = input;
    }

    pub fn is_terminal(&self) -> bool {
        TERMINAL_STATES.contains(&self.state.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_truthiness() {
        assert!(Scalar::Int(3).truthy());
        assert!(!Scalar::Int(0).truthy());
        assert!(!Scalar::Str(String::new()).truthy());
        assert!(Scalar::Str("x".into()).truthy());
        assert!(!Scalar::Bool(false).truthy());
    }

    #[test]
    fn scalar_serde_untagged() {
        let ctx: Context =
            serde_json::from_str(r#"{"fields":{"otp_fail":0,"risk_flag":false,"name":"an"}}"#)
                .unwrap();
        assert_eq!(ctx.get_int("otp_fail"), Some(0));
        assert_eq!(ctx.get("risk_flag"), Some(&Scalar::Bool(false)));
        assert_eq!(ctx.get_str("name"), Some("an"));
    }

    #[test]
    fn terminal_states() {
        let now = Utc::now();
        let mut s = Session::new("START", now);
        assert!(!s.is_terminal());
        s.state = "RETRACTED".into();
        assert!(s.is_terminal());
    }
}
