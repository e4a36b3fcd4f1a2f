//! Multi-model consensus engine.
//!
//! Coordinates several LLM providers through a structured deliberation
//! protocol -- Propose, Challenge, Revise, Commit -- so that a single
//! decision reflects adversarial review rather than one model's unchecked
//! output. Three entry points cover the supported protocols:
//!
//! - [`orchestrator::run_consensus`]: iterative deliberation with
//!   round-over-round convergence detection, for open-ended reasoning.
//! - [`orchestrator::run_voting`]: parallel single-turn fan-out plus a
//!   meta-judge aggregation pass, for judgment calls among known options.
//! - [`orchestrator::run_decompose`]: splits a question into a dependency
//!   DAG of subtasks, runs each as its own nested deliberation, and
//!   synthesizes the results.
//!
//! [`config::Protocol::Auto`] routes between consensus and voting using
//! [`classifier::classify_task_type`].
//!
//! Providers and persistence are both capability traits
//! ([`provider::Provider`], [`repository::Repository`]) so the engine never
//! depends on a specific vendor SDK or storage backend.

#![allow(dead_code)]
#![allow(clippy::uninlined_format_args)]

pub mod classifier;
pub mod config;
pub mod consensus;
pub mod context;
pub mod convergence;
pub mod decompose;
pub mod error;
pub mod orchestrator;
pub mod phase;
pub mod phases;
pub mod provider;
pub mod registry;
pub mod repository;
pub mod scheduler;
pub mod sycophancy;
pub mod synthesis;
pub mod types;
pub mod voting;

pub use config::{AggregationStrategy as VotingAggregationStrategy, EngineConfig, Protocol};
pub use context::DeliberationContext;
pub use error::{ConsensusError, ConsensusResult, ProviderError};
pub use orchestrator::{
    resolve_auto_protocol, run_consensus, run_decompose, run_voting, ConsensusOutcome,
    DecomposeOutcome, DeliberationEvent, DisplayCallback,
};
pub use phase::Phase;
pub use provider::{Message, ModelInfo, ModelResponse, Provider, Role, ToolRegistry};
pub use registry::ProviderRegistry;
pub use repository::{InMemoryRepository, Repository};
pub use types::{
    ChallengeResult, RoundResult, SubtaskResult, SubtaskSpec, SynthesisResult, TaskType,
    VoteResult, VotingAggregation,
};
