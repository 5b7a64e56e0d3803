//! Kiosk demo binary crate: the card-reissuance rule table and prompts, the
//! device dispatcher, and canned scenario scripts.

pub mod actions;
pub mod config;
pub mod scenarios;

use anyhow::Result;
use teller_core::rules::{prompts_from_json, PromptSet, RuleTable};

const DEFAULT_RULES: &str = include_str!("../rules/reissue.json");
const DEFAULT_PROMPTS: &str = include_str!("../rules/prompts.json");

/// Load the reissuance rule table, honoring a `TELLER_RULES_PATH` override.
pub fn load_rules() -> Result<RuleTable> {
    match std::env::var("TELLER_RULES_PATH") {
        Ok(path) => RuleTable::from_path(path),
        Err(_) => RuleTable::from_json(DEFAULT_RULES),
    }
}

/// Load the per-state prompt set, honoring a `TELLER_PROMPTS_PATH` override.
pub fn load_prompts() -> Result<PromptSet> {
    match std::env::var("TELLER_PROMPTS_PATH") {
        Ok(path) => {
            let text = std::fs::read_to_string(&path)?;
            prompts_from_json(&text)
        }
        Err(_) => prompts_from_json(DEFAULT_PROMPTS),
    }
}
