//! Convergence detector — decides whether another round would be expected
//! to change the answer.
//!
//! Uses the normalised-multiset-identity refinement of raw textual identity:
//! trim, lowercase, and collapse internal whitespace before comparing, so
//! that reformatting alone does not defeat convergence the way byte-for-byte
//! comparison would.

use crate::context::DeliberationContext;
use crate::types::ChallengeResult;

fn normalise(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn normalised_multiset(challenges: &[ChallengeResult]) -> Vec<String> {
    let mut normalised: Vec<String> = challenges.iter().map(|c| normalise(&c.content)).collect();
    normalised.sort();
    normalised
}

/// Evaluate and record convergence on `ctx`, returning the verdict. Round 1
/// (no archived prior round) is never convergent -- there is nothing yet to
/// compare against.
pub fn check(ctx: &mut DeliberationContext) -> bool {
    let converged = match ctx.previous_round() {
        None => false,
        Some(prev) => normalised_multiset(&ctx.challenges) == normalised_multiset(&prev.challenges),
    };
    ctx.converged = converged;
    converged
}
