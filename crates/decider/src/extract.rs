//! Pull the decision JSON out of a model reply that may wrap it in prose or
//! fenced formatting, and validate it against the decision shape.

use anyhow::{anyhow, bail, Result};
use once_cell::sync::Lazy;
use protocol::Decision;
use regex::Regex;
use serde_json::Value;

static FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)```(?:json)?\s*(\{.*?\})\s*```").unwrap());
static BRACED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

/// Find and parse the first JSON object embedded in `text`. A fenced
/// json block wins over a bare `{...}` span.
pub fn extract_json(text: &str) -> Result<Value> {
    if let Some(caps) = FENCED.captures(text) {
        return serde_json::from_str(caps.get(1).unwrap().as_str())
            .map_err(|err| anyhow!("fenced block is not valid JSON: {err}"));
    }
    let span = BRACED
        .find(text)
        .ok_or_else(|| anyhow!("no JSON object found in reply"))?;
    serde_json::from_str(span.as_str()).map_err(|err| anyhow!("reply is not valid JSON: {err}"))
}

/// Strict validation: intent, params, and response are required; the
/// response needs `type` in {text, none} and a string `content`.
pub fn validate_strict(value: &Value) -> Result<Decision> {
    let obj = value
        .as_object()
        .ok_or_else(|| anyhow!("decision is not an object"))?;
    if !obj.get("intent").is_some_and(Value::is_string) {
        bail!("intent missing or not a string");
    }
    if !obj.get("params").is_some_and(Value::is_object) {
        bail!("params missing or not an object");
    }
    let response = obj
        .get("response")
        .and_then(Value::as_object)
        .ok_or_else(|| anyhow!("response missing or not an object"))?;
    match response.get("type").and_then(Value::as_str) {
        Some("text") | Some("none") => {}
        other => bail!("response.type must be \"text\" or \"none\", got {other:?}"),
    }
    if !response.get("content").is_some_and(Value::is_string) {
        bail!("response.content missing or not a string");
    }
    Ok(serde_json::from_value(value.clone())?)
}

/// Lenient coercion for non-strict mode: salvage what parses, defaulting
/// the rest. Only a non-object reply is beyond saving.
pub fn coerce_lenient(value: &Value) -> Result<Decision> {
    let obj = value
        .as_object()
        .ok_or_else(|| anyhow!("decision is not an object"))?;
    let mut normalized = serde_json::Map::new();
    normalized.insert(
        "intent".into(),
        obj.get("intent")
            .filter(|v| v.is_string())
            .cloned()
            .unwrap_or_else(|| Value::String("cancel".into())),
    );
    normalized.insert(
        "params".into(),
        obj.get("params")
            .filter(|v| v.is_object())
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default())),
    );
    let response = obj
        .get("response")
        .cloned()
        .unwrap_or(Value::Null);
    let response = serde_json::from_value::<protocol::DecisionResponse>(response)
        .unwrap_or_else(|_| protocol::DecisionResponse::none());
    normalized.insert("response".into(), serde_json::to_value(response)?);
    if let Some(meta) = obj.get("meta").filter(|v| v.is_object()) {
        normalized.insert("meta".into(), meta.clone());
    }
    Ok(serde_json::from_value(Value::Object(normalized))?)
}
