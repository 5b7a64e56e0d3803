use std::env;
use std::sync::Arc;

use anyhow::{bail, Result};
use decider::{HttpDecider, MockDecider};
use teller::actions::KioskDispatcher;
use teller::config::load_dotenv;
use teller::scenarios::{self, DEMO_OTP};
use teller_core::Orchestrator;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            env::var("RUST_LOG").unwrap_or_else(|_| "teller=info,teller_core=info,decider=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let scenario = env::args().nth(1).unwrap_or_else(|| "happy".to_string());
    let Some(script) = scenarios::by_name(&scenario) else {
        bail!("unknown scenario '{scenario}' (expected happy, stockout, or otp_wrong)");
    };

    let rules = Arc::new(teller::load_rules()?);
    let prompts = Arc::new(teller::load_prompts()?);

    let mut dispatcher = KioskDispatcher::from_env();
    // The scripts speak a fixed code; pin the device to it unless the
    // operator configured one.
    dispatcher.fixed_otp.get_or_insert_with(|| DEMO_OTP.to_string());
    if scenario == "stockout" {
        dispatcher.stock_ok = false;
    }

    info!(%scenario, "starting kiosk session");

    let session = if env::var("TELLER_LLM_URL").is_ok() {
        let http = HttpDecider::from_env()?;
        let engine = Orchestrator::new(rules, prompts, http, dispatcher);
        scenarios::run(&engine, script).await?
    } else {
        let engine = Orchestrator::new(rules, prompts, MockDecider::new(), dispatcher);
        scenarios::run(&engine, script).await?
    };

    info!(
        state = %session.state,
        otp_fail = session.ctx.get_int("otp_fail").unwrap_or(0),
        "session finished"
    );
    Ok(())
}
