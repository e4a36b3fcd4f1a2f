//! Phase handlers — Propose, Challenge, Revise, Commit.
//!
//! Each handler requires the context to already be in its phase, consumes
//! what the previous phase produced, calls whatever models it needs, and
//! mutates the context with its output. None of them transition the phase
//! themselves — that is [`crate::phase::apply`]'s job, called by the
//! orchestrator after a handler returns successfully.

pub mod commit;
pub mod challenge;
pub mod propose;
pub mod revise;

use chrono::Utc;

/// Sentence prepended to every Propose/Challenge/Revise system prompt so
/// models reason from the present rather than training-time assumptions.
pub fn grounding_prefix() -> String {
    let today = Utc::now().date_naive();
    format!(
        "Today's date is {today}. When referencing timeframes, technologies, market conditions, \
         or costs, ground your answer in the current date. Use concrete, current information."
    )
}
