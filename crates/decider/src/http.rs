//! HTTP decision provider: POST `{"query": prompt}` to the remote endpoint,
//! retry transient failures with exponential backoff, then extract and
//! validate the embedded decision JSON. Every failure path degrades into a
//! well-formed decision; this port never errors.

use crate::extract;
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use chrono::Utc;
use protocol::{Decision, Input, PromptConfig};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use teller_core::ports::DecisionPort;
use teller_core::session::{Context, Scalar};
use tracing::{debug, warn};

const SERVICE_INTERRUPTED: &str = "Sorry, the service is temporarily unavailable.";
const INVALID_OUTPUT: &str = "Sorry, I could not process that reply.";

#[derive(Debug, Clone)]
pub struct DeciderConfig {
    pub url: String,
    pub timeout: Duration,
    pub strict: bool,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl DeciderConfig {
    pub fn new(url: &str) -> Self {
        DeciderConfig {
            url: url.to_string(),
            timeout: Duration::from_secs(12),
            strict: true,
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(2),
        }
    }

    /// Environment-driven config. `TELLER_LLM_URL` is required;
    /// `TELLER_LLM_TIMEOUT_SECS` and `TELLER_STRICT_JSON` tune the rest.
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("TELLER_LLM_URL").context("TELLER_LLM_URL is not set")?;
        let mut cfg = Self::new(&url);
        if let Ok(secs) = std::env::var("TELLER_LLM_TIMEOUT_SECS") {
            cfg.timeout = Duration::from_secs(secs.parse().context("bad TELLER_LLM_TIMEOUT_SECS")?);
        }
        if let Ok(strict) = std::env::var("TELLER_STRICT_JSON") {
            cfg.strict = strict != "0";
        }
        Ok(cfg)
    }
}

/// Wire reply from the decision endpoint; the decision JSON is embedded in
/// the `response` string.
#[derive(Debug, Deserialize)]
struct QueryReply {
    #[serde(default)]
    #[allow(dead_code)]
    status: Option<String>,
    #[serde(default)]
    response: String,
}

pub struct HttpDecider {
    http: reqwest::Client,
    cfg: DeciderConfig,
}

impl HttpDecider {
    pub fn new(cfg: DeciderConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .context("building http client")?;
        Ok(HttpDecider { http, cfg })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(DeciderConfig::from_env()?)
    }

    /// Serialize the provider request: prompt config plus state, allowlist,
    /// the raw utterance, and the session's counters/flags (sorted for
    /// stable prompts).
    fn build_prompt(
        &self,
        state: &str,
        allowed: &[String],
        input: &Input,
        prompt: &PromptConfig,
        ctx: &Context,
    ) -> String {
        let mut context = prompt.context.clone();
        context.insert("state".into(), json!(state));
        context.insert("allowed_intents".into(), json!(allowed));
        context.insert("input_channel".into(), json!(input.channel));
        if let Some(signal) = &input.signal {
            context.insert("system_signal".into(), json!(signal));
        }

        let mut counters = BTreeMap::new();
        let mut flags = BTreeMap::new();
        for (key, value) in &ctx.fields {
            match value {
                Scalar::Bool(b) => {
                    flags.insert(key.clone(), json!(b));
                }
                Scalar::Int(n) => {
                    counters.insert(key.clone(), json!(n));
                }
                Scalar::Float(f) => {
                    counters.insert(key.clone(), json!(f));
                }
                Scalar::Str(_) => {}
            }
        }
        if !counters.is_empty() {
            context.insert("session_counters".into(), json!(counters));
        }
        if !flags.is_empty() {
            context.insert("session_flags".into(), json!(flags));
        }

        let mut body = Map::new();
        body.insert("system".into(), json!(prompt.system));
        body.insert("context".into(), Value::Object(context));
        body.insert("state".into(), json!(state));
        body.insert("allowed_intents".into(), json!(allowed));
        body.insert("user_utterance".into(), json!(input.payload));
        if !prompt.instructions.is_empty() {
            body.insert("instructions".into(), json!(prompt.instructions));
        }
        if let Some(examples) = &prompt.examples {
            body.insert("examples".into(), examples.clone());
        }
        Value::Object(body).to_string()
    }

    /// POST with retry: transient transport failures (connect errors,
    /// timeouts, non-success status, unparseable envelope) back off
    /// exponentially from the base up to the cap.
    async fn post_query(&self, prompt: &str) -> Result<String> {
        let mut delay = self.cfg.backoff_base;
        let mut last_err = None;
        for attempt in 1..=self.cfg.max_attempts {
            match self.try_post(prompt).await {
                Ok(text) => return Ok(text),
                Err(err) => {
                    warn!(attempt, %err, "decision endpoint call failed");
                    last_err = Some(err);
                    if attempt < self.cfg.max_attempts {
                        tokio::time::sleep(delay).await;
                        delay = (delay * 2).min(self.cfg.backoff_cap);
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("decision endpoint retries exhausted")))
    }

    async fn try_post(&self, prompt: &str) -> Result<String> {
        let reply: QueryReply = self
            .http
            .post(&self.cfg.url)
            .json(&json!({ "query": prompt }))
            .send()
            .await
            .context("request failed")?
            .error_for_status()
            .context("non-success status")?
            .json()
            .await
            .context("invalid reply envelope")?;
        Ok(reply.response)
    }

    /// Turn the raw reply text into a decision: extract, validate (strict)
    /// or coerce (lenient), clamp the intent to the allowlist, stamp a
    /// trace id. Exposed for tests.
    pub fn interpret(&self, reply: &str, allowed: &[String]) -> Decision {
        let now = Utc::now().timestamp();
        let value = match extract::extract_json(reply) {
            Ok(value) => value,
            Err(err) => {
                warn!(%err, "no decision JSON in reply");
                return Decision::cancel(INVALID_OUTPUT)
                    .with_meta("error", err.to_string())
                    .with_meta("trace_id", format!("http-json-{now}"));
            }
        };

        let verdict = if self.cfg.strict {
            extract::validate_strict(&value)
        } else {
            extract::coerce_lenient(&value)
        };
        let mut decision = match verdict {
            Ok(decision) => decision,
            Err(err) => {
                warn!(%err, strict = self.cfg.strict, "decision failed validation");
                return Decision::cancel(INVALID_OUTPUT)
                    .with_meta("error", err.to_string())
                    .with_meta("trace_id", format!("http-schema-{now}"));
            }
        };

        if !allowed.is_empty()
            && decision.intent != "cancel"
            && !allowed.contains(&decision.intent)
        {
            decision.meta.insert(
                "note".into(),
                json!(format!("intent `{}` not allowed, coerced to cancel", decision.intent)),
            );
            decision.intent = "cancel".into();
        }
        decision
            .meta
            .entry("trace_id")
            .or_insert_with(|| json!(format!("run-{now}")));
        decision
    }
}

#[async_trait]
impl DecisionPort for HttpDecider {
    async fn decide(
        &self,
        state: &str,
        allowed_intents: &[String],
        input: &Input,
        prompt: &PromptConfig,
        ctx: &Context,
    ) -> Decision {
        let prompt_text = self.build_prompt(state, allowed_intents, input, prompt, ctx);
        debug!(%state, prompt = %prompt_text, "querying decision endpoint");

        let reply = match self.post_query(&prompt_text).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(%state, %err, "decision endpoint unreachable, degrading");
                return Decision::cancel(SERVICE_INTERRUPTED)
                    .with_meta("error", err.to_string())
                    .with_meta("trace_id", format!("http-ex-{}", Utc::now().timestamp()));
            }
        };

        self.interpret(&reply, allowed_intents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::ResponseKind;

    fn decider(strict: bool) -> HttpDecider {
        let mut cfg = DeciderConfig::new("http://127.0.0.1:9/query");
        cfg.strict = strict;
        HttpDecider::new(cfg).unwrap()
    }

    fn allowed() -> Vec<String> {
        vec!["provide_otp".into(), "resend_otp".into(), "cancel".into()]
    }

    #[test]
    fn interprets_clean_decision() {
        let d = decider(true).interpret(
            r#"{"intent":"provide_otp","params":{"otp":"482913"},"response":{"type":"text","content":"ok"}}"#,
            &allowed(),
        );
        assert_eq!(d.intent, "provide_otp");
        assert_eq!(d.params["otp"], "482913");
        assert!(d.meta["trace_id"].as_str().unwrap().starts_with("run-"));
    }

    #[test]
    fn unparseable_reply_degrades_to_cancel() {
        let d = decider(true).interpret("sorry, no machine output here", &allowed());
        assert_eq!(d.intent, "cancel");
        assert_eq!(d.response.kind, ResponseKind::Text);
        assert!(d.meta["trace_id"].as_str().unwrap().starts_with("http-json-"));
    }

    #[test]
    fn strict_mode_rejects_schema_violations() {
        let d = decider(true).interpret(r#"{"intent":"provide_otp"}"#, &allowed());
        assert_eq!(d.intent, "cancel");
        assert!(d.meta["trace_id"].as_str().unwrap().starts_with("http-schema-"));
    }

    #[test]
    fn lenient_mode_salvages_the_same_reply() {
        let d = decider(false).interpret(r#"{"intent":"provide_otp"}"#, &allowed());
        assert_eq!(d.intent, "provide_otp");
        assert!(d.params.is_empty());
    }

    #[test]
    fn disallowed_intent_is_coerced() {
        let d = decider(true).interpret(
            r#"{"intent":"open_account","params":{},"response":{"type":"none","content":""}}"#,
            &allowed(),
        );
        assert_eq!(d.intent, "cancel");
        assert!(d.meta["note"].as_str().unwrap().contains("open_account"));
    }

    #[test]
    fn prompt_carries_counters_and_flags() {
        let decider = decider(true);
        let mut ctx = Context::new();
        ctx.set("otp_fail", 2i64);
        ctx.set("risk_flag", true);
        ctx.set("customer_name", "an");
        let prompt = decider.build_prompt(
            "OTP",
            &allowed(),
            &Input::voice("482913"),
            &PromptConfig::default(),
            &ctx,
        );
        let value: Value = serde_json::from_str(&prompt).unwrap();
        assert_eq!(value["state"], "OTP");
        assert_eq!(value["user_utterance"], "482913");
        assert_eq!(value["context"]["session_counters"]["otp_fail"], 2);
        assert_eq!(value["context"]["session_flags"]["risk_flag"], true);
        assert!(value["context"]["session_counters"].get("customer_name").is_none());
    }
}
