use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Input channel for one tick: where the signal/payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Voice,
    System,
    Touch,
}

/// One external input consumed by a tick. An explicit `signal` takes
/// precedence over any intent derived from `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Input {
    pub channel: Channel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
    #[serde(default)]
    pub payload: String,
}

impl Input {
    pub fn voice<S: Into<String>>(payload: S) -> Self {
        Input {
            channel: Channel::Voice,
            signal: None,
            payload: payload.into(),
        }
    }

    pub fn system<S: Into<String>>(signal: S) -> Self {
        Input {
            channel: Channel::System,
            signal: Some(signal.into()),
            payload: String::new(),
        }
    }

    pub fn touch<S: Into<String>>(signal: S) -> Self {
        Input {
            channel: Channel::Touch,
            signal: Some(signal.into()),
            payload: String::new(),
        }
    }

    /// The absent input: no signal, empty payload.
    pub fn empty() -> Self {
        Input {
            channel: Channel::System,
            signal: None,
            payload: String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.signal.is_none() && self.payload.is_empty()
    }
}

impl Default for Input {
    fn default() -> Self {
        Self::empty()
    }
}

/// User-visible response kind inside a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    Text,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionResponse {
    #[serde(rename = "type")]
    pub kind: ResponseKind,
    pub content: String,
}

impl DecisionResponse {
    pub fn text<S: Into<String>>(content: S) -> Self {
        DecisionResponse {
            kind: ResponseKind::Text,
            content: content.into(),
        }
    }

    pub fn none() -> Self {
        DecisionResponse {
            kind: ResponseKind::None,
            content: String::new(),
        }
    }
}

impl Default for DecisionResponse {
    fn default() -> Self {
        Self::none()
    }
}

/// Structured output of the decision provider: an intent constrained to the
/// per-state allowlist, free-form params, a user-facing response, and
/// diagnostic metadata (trace id, degradation error).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub intent: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    pub response: DecisionResponse,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
}

impl Decision {
    /// Neutral decision synthesized for device-driven states; the provider
    /// is never consulted for these.
    pub fn no_op() -> Self {
        Decision {
            intent: "_no_op".to_string(),
            params: Map::new(),
            response: DecisionResponse::none(),
            meta: Map::new(),
        }
    }

    pub fn cancel<S: Into<String>>(content: S) -> Self {
        Decision {
            intent: "cancel".to_string(),
            params: Map::new(),
            response: DecisionResponse::text(content),
            meta: Map::new(),
        }
    }

    pub fn with_meta<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Ui,
    Tts,
    Api,
    Clock,
}

/// One side-effecting action from a transition rule. `clock`/`start_timer`
/// is intercepted by the engine; everything else goes to the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl Action {
    pub fn new(kind: ActionKind, name: &str) -> Self {
        Action {
            kind,
            name: name.to_string(),
            args: Map::new(),
        }
    }

    pub fn ui(name: &str) -> Self {
        Self::new(ActionKind::Ui, name)
    }

    pub fn with_arg<V: Into<Value>>(mut self, key: &str, value: V) -> Self {
        self.args.insert(key.to_string(), value.into());
        self
    }
}

/// Result of dispatching one action: at most one signal fed back into the
/// next tick (channel = system).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
}

impl ActionOutcome {
    pub fn none() -> Self {
        ActionOutcome { signal: None }
    }

    pub fn signal<S: Into<String>>(signal: S) -> Self {
        ActionOutcome {
            signal: Some(signal.into()),
        }
    }
}

/// Per-state prompt configuration, passed opaquely to the decision provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptConfig {
    #[serde(default)]
    pub system: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub examples: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_roundtrip() {
        let input = Input::system("otp_ok");
        let json = serde_json::to_string(&input).unwrap();
        let back: Input = serde_json::from_str(&json).unwrap();
        assert_eq!(back, input);
        assert_eq!(back.channel, Channel::System);
    }

    #[test]
    fn empty_input_is_empty() {
        assert!(Input::empty().is_empty());
        assert!(!Input::voice("482913").is_empty());
    }

    #[test]
    fn decision_wire_shape() {
        let raw = r#"{"intent":"provide_otp","params":{"otp":"482913"},"response":{"type":"text","content":"checking"}}"#;
        let d: Decision = serde_json::from_str(raw).unwrap();
        assert_eq!(d.intent, "provide_otp");
        assert_eq!(d.params["otp"], "482913");
        assert_eq!(d.response.kind, ResponseKind::Text);
        assert!(d.meta.is_empty());
    }

    #[test]
    fn action_defaults_args() {
        let raw = r#"{"type":"api","name":"print_card"}"#;
        let a: Action = serde_json::from_str(raw).unwrap();
        assert_eq!(a.kind, ActionKind::Api);
        assert!(a.args.is_empty());
    }
}
