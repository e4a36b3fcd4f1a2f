//! Engine configuration.
//!
//! Pure data — no file or environment parsing here. Loading configuration
//! from disk or the environment belongs to the CLI surface that wraps this
//! crate, not to the crate itself.

use serde::{Deserialize, Serialize};

/// Which top-level protocol an orchestrator entry point should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Consensus,
    Voting,
    Auto,
}

impl Default for Protocol {
    fn default() -> Self {
        Self::Consensus
    }
}

/// Aggregation strategy for the voting protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationStrategy {
    Majority,
    Weighted,
}

impl Default for AggregationStrategy {
    fn default() -> Self {
        Self::Majority
    }
}

impl std::fmt::Display for AggregationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Majority => write!(f, "majority"),
            Self::Weighted => write!(f, "weighted"),
        }
    }
}

/// Decomposition-specific knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DecomposeConfig {
    /// Upper bound on the number of subtasks a decomposition may request.
    pub max_subtasks: usize,
    /// Whether independent subtasks within a topological layer run concurrently.
    pub parallel: bool,
}

impl Default for DecomposeConfig {
    fn default() -> Self {
        Self {
            max_subtasks: 7,
            parallel: true,
        }
    }
}

/// Voting-specific knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VotingConfig {
    pub aggregation: AggregationStrategy,
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            aggregation: AggregationStrategy::default(),
        }
    }
}

/// Cost governance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CostConfig {
    /// Cumulative spend ceiling in the provider registry's currency unit. 0 = unlimited.
    pub hard_limit: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self { hard_limit: 0.0 }
    }
}

/// Sampling defaults per phase. Distinct temperatures reflect that
/// deliberative phases want variety while classification wants determinism.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SamplingConfig {
    pub deliberation_temperature: f32,
    pub classification_temperature: f32,
    pub deliberation_max_tokens: u32,
    pub classification_max_tokens: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            deliberation_temperature: 0.7,
            classification_temperature: 0.3,
            deliberation_max_tokens: 4096,
            classification_max_tokens: 200,
        }
    }
}

/// Top-level configuration handed to every orchestrator entry point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub max_rounds: u32,
    pub challenge_count: usize,
    pub protocol: Protocol,
    pub decompose: DecomposeConfig,
    pub voting: VotingConfig,
    pub cost: CostConfig,
    pub sampling: SamplingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            challenge_count: 2,
            protocol: Protocol::default(),
            decompose: DecomposeConfig::default(),
            voting: VotingConfig::default(),
            cost: CostConfig::default(),
            sampling: SamplingConfig::default(),
        }
    }
}
