//! Named absolute-expiry timers stored in session context.
//!
//! Timers are never auto-cleared: `check_expired` only reports, and the
//! check-timeouts phase clears the entry after consuming the expiry.

use crate::session::Context;
use chrono::{DateTime, Duration, Utc};

/// Arm (or re-arm) `name` to expire `secs` seconds after `now`.
/// Overwrites any prior expiry.
pub fn set(ctx: &mut Context, name: &str, secs: u64, now: DateTime<Utc>) {
    ctx.timers
        .insert(name.to_string(), now + Duration::seconds(secs as i64));
}

/// Remove the timer entirely. No-op if absent.
pub fn clear(ctx: &mut Context, name: &str) {
    ctx.timers.remove(name);
}

/// Return one timer whose expiry is at or before `now`, or `None`.
///
/// When several timers are due in the same tick the earliest expiry wins,
/// with the lexicographically smallest name breaking ties. This keeps
/// multi-expiry resolution deterministic across runs.
pub fn check_expired(ctx: &Context, now: DateTime<Utc>) -> Option<String> {
    ctx.timers
        .iter()
        .filter(|(_, expiry)| **expiry <= now)
        .min_by_key(|(name, expiry)| (**expiry, (*name).clone()))
        .map(|(name, _)| name.clone())
}
