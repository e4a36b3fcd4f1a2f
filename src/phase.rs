//! Deliberation phase graph — the total function from
//! `(phase, transition, context)` to `phase | error`.
//!
//! Modelled on the debate session's phase machine: an enum with a fixed
//! transition table plus a guard evaluated against live context, rather than
//! one method per state.

use serde::{Deserialize, Serialize};

use crate::context::DeliberationContext;

/// Phase of a single deliberation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Decompose,
    Propose,
    Challenge,
    Revise,
    Commit,
    Complete,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Targets this phase could legally move to, ignoring guards.
    pub fn reachable_targets(self) -> &'static [Phase] {
        match self {
            Self::Idle => &[Self::Decompose, Self::Propose, Self::Failed],
            Self::Decompose => &[Self::Propose, Self::Failed],
            Self::Propose => &[Self::Challenge, Self::Failed],
            Self::Challenge => &[Self::Revise, Self::Failed],
            Self::Revise => &[Self::Commit, Self::Failed],
            Self::Commit => &[Self::Propose, Self::Complete, Self::Failed],
            Self::Complete | Self::Failed => &[],
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Decompose => write!(f, "decompose"),
            Self::Propose => write!(f, "propose"),
            Self::Challenge => write!(f, "challenge"),
            Self::Revise => write!(f, "revise"),
            Self::Commit => write!(f, "commit"),
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Raised when a transition is illegal for the current phase, or legal but
/// its guard does not hold against the current context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: Phase,
    pub to: Phase,
    pub reason: String,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid transition {} -> {}: {}", self.from, self.to, self.reason)
    }
}

impl std::error::Error for TransitionError {}

fn guard_failure(from: Phase, to: Phase, reason: impl Into<String>) -> TransitionError {
    TransitionError {
        from,
        to,
        reason: reason.into(),
    }
}

/// Evaluate whether `ctx.phase -> to` is legal right now, without mutating
/// anything. Used by `validTransitions`-style introspection and by `apply`.
pub fn can_transition(ctx: &DeliberationContext, to: Phase) -> Result<(), TransitionError> {
    let from = ctx.phase;
    if from.is_terminal() {
        return Err(guard_failure(from, to, "terminal state"));
    }
    if !from.reachable_targets().contains(&to) {
        return Err(guard_failure(from, to, "invalid transition"));
    }

    match (from, to) {
        (Phase::Idle, Phase::Decompose) | (Phase::Idle, Phase::Propose) => {
            if ctx.question.trim().is_empty() {
                return Err(guard_failure(from, to, "question is empty"));
            }
        }
        (Phase::Decompose, Phase::Propose) => {}
        (Phase::Propose, Phase::Challenge) => {
            if ctx.proposal.is_none() {
                return Err(guard_failure(from, to, "no proposal set"));
            }
        }
        (Phase::Challenge, Phase::Revise) => {
            if ctx.challenges.is_empty() {
                return Err(guard_failure(from, to, "no challenges received"));
            }
        }
        (Phase::Revise, Phase::Commit) => {
            if ctx.revision.is_none() {
                return Err(guard_failure(from, to, "no revision set"));
            }
        }
        (Phase::Commit, Phase::Propose) => {
            if ctx.converged {
                return Err(guard_failure(from, to, "already converged"));
            }
            if ctx.current_round >= ctx.max_rounds {
                return Err(guard_failure(from, to, "max rounds already reached"));
            }
        }
        (Phase::Commit, Phase::Complete) => {
            if !ctx.converged && ctx.current_round < ctx.max_rounds {
                return Err(guard_failure(from, to, "not converged, rounds remaining"));
            }
        }
        (_, Phase::Failed) => {}
        _ => return Err(guard_failure(from, to, "invalid transition")),
    }

    Ok(())
}

/// All phases currently reachable given both the table and live guards.
pub fn valid_transitions(ctx: &DeliberationContext) -> Vec<Phase> {
    ctx.phase
        .reachable_targets()
        .iter()
        .copied()
        .filter(|&to| can_transition(ctx, to).is_ok())
        .collect()
}

/// Apply a transition, mutating `ctx` per the phase's entry semantics.
pub fn apply(ctx: &mut DeliberationContext, to: Phase) -> Result<(), TransitionError> {
    can_transition(ctx, to)?;
    let from = ctx.phase;

    match (from, to) {
        (Phase::Idle, Phase::Propose) => {
            ctx.current_round = 1;
            ctx.clear_round_data();
        }
        (Phase::Decompose, Phase::Propose) => {
            ctx.current_round = 1;
            ctx.clear_round_data();
        }
        (Phase::Commit, Phase::Propose) => {
            ctx.archive_round();
            ctx.clear_round_data();
            ctx.current_round += 1;
        }
        (Phase::Commit, Phase::Complete) => {
            ctx.archive_round();
        }
        _ => {}
    }

    ctx.phase = to;
    Ok(())
}
