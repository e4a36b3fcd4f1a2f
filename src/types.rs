//! Shared data model types used across phase handlers, voting, and
//! decomposition.

use serde::{Deserialize, Serialize};

use crate::sycophancy::ChallengeFraming;

/// One challenger's response to a proposal, with its sycophancy verdict and
/// assigned adversarial framing already attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeResult {
    pub model_ref: String,
    pub content: String,
    pub sycophantic: bool,
    pub framing: ChallengeFraming,
}

/// A completed round, archived into `DeliberationContext::round_history`
/// when the next round starts or the deliberation completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundResult {
    pub round_number: u32,
    pub proposal: Option<String>,
    pub proposal_model: Option<String>,
    pub challenges: Vec<ChallengeResult>,
    pub revision: Option<String>,
    pub decision: Option<String>,
    pub confidence: f64,
    pub dissent: Option<String>,
}

/// Free-form classification attached to a commit when requested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Taxonomy {
    pub intent: String,
    pub category: String,
    pub genus: Option<String>,
}

/// One node of a decomposition DAG, as produced by the decomposition model
/// call and validated before scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskSpec {
    pub label: String,
    pub description: String,
    pub dependencies: Vec<String>,
}

/// Outcome of running one subtask's nested deliberation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskResult {
    pub label: String,
    pub decision: String,
    pub confidence: f64,
}

/// Strategy used to merge subtask results back into one answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisStrategy {
    Merge,
    Prioritize,
}

impl Default for SynthesisStrategy {
    fn default() -> Self {
        Self::Merge
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisResult {
    pub content: String,
    pub confidence: f64,
    pub strategy: SynthesisStrategy,
}

/// A single model's vote in the voting protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteResult {
    pub model_ref: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationStrategy {
    Majority,
    Weighted,
}

/// The aggregated outcome of a voting run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotingAggregation {
    pub decision: String,
    pub confidence: f64,
    pub strategy: Option<AggregationStrategy>,
    pub votes: Vec<VoteResult>,
}

impl VotingAggregation {
    pub fn empty() -> Self {
        Self {
            decision: String::new(),
            confidence: 0.0,
            strategy: None,
            votes: Vec::new(),
        }
    }
}

/// Coarse classification of a question used to route between the
/// consensus and voting protocols under `Protocol::Auto`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Reasoning,
    Judgment,
    Unknown,
}
