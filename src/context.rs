//! Deliberation context — the single mutable object a deliberation owns for
//! its entire lifetime.
//!
//! Never shared across deliberations, so no synchronisation is needed here;
//! the only genuinely shared state in this crate lives in
//! [`crate::registry::ProviderRegistry`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::phase::Phase;
use crate::provider::ToolCall;
use crate::types::{ChallengeResult, RoundResult, SubtaskSpec, Taxonomy};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub call: ToolCall,
    pub result: String,
    pub at: DateTime<Utc>,
}

/// Working state of one deliberation. Constructed by the orchestrator,
/// mutated by the phase graph and its handlers, and handed to the
/// repository once it reaches [`Phase::Complete`] or [`Phase::Failed`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliberationContext {
    pub question: String,
    pub max_rounds: u32,
    pub phase: Phase,
    pub current_round: u32,

    pub proposal: Option<String>,
    pub proposal_model: Option<String>,
    pub challenges: Vec<ChallengeResult>,
    pub revision: Option<String>,
    pub revision_model: Option<String>,

    pub decision: Option<String>,
    pub confidence: f64,
    pub dissent: Option<String>,
    pub taxonomy: Option<Taxonomy>,

    pub converged: bool,
    pub round_history: Vec<RoundResult>,

    pub subtasks: Option<Vec<SubtaskSpec>>,
    pub tool_calls_log: Vec<ToolCallRecord>,
    pub error: Option<String>,
}

impl DeliberationContext {
    pub fn new(question: impl Into<String>, max_rounds: u32) -> Self {
        Self {
            question: question.into(),
            max_rounds,
            phase: Phase::Idle,
            current_round: 0,
            proposal: None,
            proposal_model: None,
            challenges: Vec::new(),
            revision: None,
            revision_model: None,
            decision: None,
            confidence: 0.0,
            dissent: None,
            taxonomy: None,
            converged: false,
            round_history: Vec::new(),
            subtasks: None,
            tool_calls_log: Vec::new(),
            error: None,
        }
    }

    /// Clear the per-round working fields at the start of a new round.
    /// `tool_calls_log` and `round_history` are append-only and survive this.
    pub fn clear_round_data(&mut self) {
        self.proposal = None;
        self.proposal_model = None;
        self.challenges.clear();
        self.revision = None;
        self.revision_model = None;
        self.decision = None;
        self.confidence = 0.0;
        self.dissent = None;
        self.taxonomy = None;
        self.converged = false;
    }

    /// Snapshot the current round into `round_history`.
    pub fn archive_round(&mut self) {
        self.round_history.push(RoundResult {
            round_number: self.current_round,
            proposal: self.proposal.clone(),
            proposal_model: self.proposal_model.clone(),
            challenges: self.challenges.clone(),
            revision: self.revision.clone(),
            decision: self.decision.clone(),
            confidence: self.confidence,
            dissent: self.dissent.clone(),
        });
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.phase = Phase::Failed;
        self.error = Some(reason.into());
    }

    /// The previously archived round, if any — used by Propose in round > 1
    /// to build the "previously the answer was..." prompt.
    pub fn previous_round(&self) -> Option<&RoundResult> {
        self.round_history.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_context_starts_idle_with_no_round_data() {
        let ctx = DeliberationContext::new("q", 3);
        assert_eq!(ctx.phase, Phase::Idle);
        assert_eq!(ctx.current_round, 0);
        assert!(ctx.proposal.is_none());
        assert!(ctx.round_history.is_empty());
    }

    #[test]
    fn clear_round_data_preserves_history_and_tool_log() {
        let mut ctx = DeliberationContext::new("q", 3);
        ctx.proposal = Some("p".to_string());
        ctx.archive_round();
        ctx.clear_round_data();
        assert!(ctx.proposal.is_none());
        assert_eq!(ctx.round_history.len(), 1);
    }

    #[test]
    fn fail_sets_terminal_phase_and_error() {
        let mut ctx = DeliberationContext::new("q", 3);
        ctx.fail("cancelled");
        assert_eq!(ctx.phase, Phase::Failed);
        assert_eq!(ctx.error.as_deref(), Some("cancelled"));
    }
}
