//! Orchestrator-facing entry points: `run_consensus`, `run_voting`,
//! `run_decompose`, plus the auto-routing `protocol` dispatch.
//!
//! This is the only module downstream callers (a CLI, an HTTP handler)
//! should depend on directly.

use tokio_util::sync::CancellationToken;

use crate::classifier::classify_task_type;
use crate::config::{EngineConfig, Protocol};
use crate::consensus::{self, DeliberationOptions};
use crate::context::DeliberationContext;
use crate::decompose;
use crate::error::ConsensusError;
use crate::phase::Phase;
use crate::provider::ToolRegistry;
use crate::registry::ProviderRegistry;
use crate::repository::{DecompositionRecord, DeliberationRecord, Repository, VotingRecord};
use crate::scheduler;
use crate::synthesis::{self, SynthesisStrategy};
use crate::types::{SubtaskResult, TaskType, VotingAggregation};
use crate::voting;

/// A lifecycle notification an orchestrator can subscribe to for progress
/// display. Deliberately narrow: a callback, not a replayable event bus --
/// nothing downstream needs historical replay of a single deliberation.
#[derive(Debug, Clone)]
pub enum DeliberationEvent {
    PhaseEntered { phase: Phase, round: u32 },
    RoundArchived { round: u32, confidence: f64 },
    Complete { confidence: f64 },
    Failed { reason: String },
}

pub type DisplayCallback = Box<dyn Fn(&DeliberationEvent) + Send + Sync>;

fn notify(display: Option<&DisplayCallback>, event: DeliberationEvent) {
    if let Some(cb) = display {
        cb(&event);
    }
}

/// Outcome of a completed or failed consensus run.
#[derive(Debug, Clone)]
pub struct ConsensusOutcome {
    pub decision: Option<String>,
    pub confidence: f64,
    pub dissent: Option<String>,
    pub total_cost: f64,
}

#[allow(clippy::too_many_arguments)]
pub async fn run_consensus(
    question: &str,
    registry: &ProviderRegistry,
    config: &EngineConfig,
    cancellation: &CancellationToken,
    display: Option<&DisplayCallback>,
    tool_registry: Option<&dyn ToolRegistry>,
    repository: Option<&dyn Repository>,
) -> ConsensusOutcome {
    let options = DeliberationOptions::default();
    let ctx =
        consensus::run(question, config.max_rounds, registry, &options, config, cancellation, tool_registry).await;
    report_outcome(&ctx, registry, repository, display).await
}

async fn report_outcome(
    ctx: &DeliberationContext,
    registry: &ProviderRegistry,
    repository: Option<&dyn Repository>,
    display: Option<&DisplayCallback>,
) -> ConsensusOutcome {
    let total_cost = registry.cumulative_cost().await;

    match ctx.phase {
        Phase::Complete => {
            notify(display, DeliberationEvent::Complete { confidence: ctx.confidence });
            if let Some(repo) = repository {
                let record = DeliberationRecord {
                    thread_id: uuid::Uuid::new_v4().to_string(),
                    question: &ctx.question,
                    context: ctx,
                };
                let _ = repo.save_deliberation(record).await;
            }
        }
        Phase::Failed => {
            let reason = ctx.error.clone().unwrap_or_default();
            notify(display, DeliberationEvent::Failed { reason });
        }
        _ => {}
    }

    ConsensusOutcome {
        decision: ctx.decision.clone(),
        confidence: ctx.confidence,
        dissent: ctx.dissent.clone(),
        total_cost,
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn run_voting(
    question: &str,
    registry: &ProviderRegistry,
    config: &EngineConfig,
    cancellation: &CancellationToken,
    display: Option<&DisplayCallback>,
    _tool_registry: Option<&dyn ToolRegistry>,
    repository: Option<&dyn Repository>,
) -> Result<VotingAggregation, ConsensusError> {
    let aggregation =
        match voting::run_voting(question, registry, config.voting.aggregation, None, config, cancellation).await {
            Ok(aggregation) => aggregation,
            Err(e) => {
                notify(display, DeliberationEvent::Failed { reason: e.to_string() });
                return Err(e);
            }
        };
    notify(display, DeliberationEvent::Complete { confidence: aggregation.confidence });
    if let Some(repo) = repository {
        let record = VotingRecord {
            thread_id: uuid::Uuid::new_v4().to_string(),
            question,
            aggregation: &aggregation,
        };
        let _ = repo.save_voting(record).await;
    }
    Ok(aggregation)
}

/// Outcome of a decomposed run: a synthesis of the subtask results, along
/// with each subtask's own decision.
#[derive(Debug, Clone)]
pub struct DecomposeOutcome {
    pub synthesis: String,
    pub confidence: f64,
    pub subtask_results: Vec<SubtaskResult>,
    pub total_cost: f64,
}

#[allow(clippy::too_many_arguments)]
pub async fn run_decompose(
    question: &str,
    registry: &ProviderRegistry,
    config: &EngineConfig,
    cancellation: &CancellationToken,
    display: Option<&DisplayCallback>,
    tool_registry: Option<&dyn ToolRegistry>,
    repository: Option<&dyn Repository>,
) -> Result<DecomposeOutcome, ConsensusError> {
    let subtasks = match decompose::decompose(question, registry, config, cancellation).await {
        Ok(subtasks) => subtasks,
        Err(e) => {
            notify(display, DeliberationEvent::Failed { reason: e.to_string() });
            return Err(e);
        }
    };

    // Single-subtask optimisation: skip the scheduler and synthesis, run a
    // normal consensus deliberation directly against the original question.
    if subtasks.len() == 1 {
        let options = DeliberationOptions::default();
        let ctx = consensus::run(question, config.max_rounds, registry, &options, config, cancellation, tool_registry)
            .await;
        let decision = ctx.decision.clone().unwrap_or_default();
        let confidence = ctx.confidence;
        notify(display, DeliberationEvent::Complete { confidence });
        return Ok(DecomposeOutcome {
            synthesis: decision,
            confidence,
            subtask_results: vec![SubtaskResult {
                label: subtasks[0].label.clone(),
                decision: ctx.decision.unwrap_or_default(),
                confidence,
            }],
            total_cost: registry.cumulative_cost().await,
        });
    }

    let results = match scheduler::schedule_subtasks(question, &subtasks, registry, config, cancellation).await {
        Ok(results) => results,
        Err(e) => {
            notify(display, DeliberationEvent::Failed { reason: e.to_string() });
            return Err(e);
        }
    };
    let synthesis = match synthesis::synthesize(
        question,
        &results,
        registry,
        SynthesisStrategy::default(),
        config,
        cancellation,
    )
    .await
    {
        Ok(synthesis) => synthesis,
        Err(e) => {
            notify(display, DeliberationEvent::Failed { reason: e.to_string() });
            return Err(e);
        }
    };

    notify(display, DeliberationEvent::Complete { confidence: synthesis.confidence });
    if let Some(repo) = repository {
        let record = DecompositionRecord {
            thread_id: uuid::Uuid::new_v4().to_string(),
            question,
            subtask_results: &results,
            synthesis: &synthesis.content,
        };
        let _ = repo.save_decomposition(record).await;
    }

    Ok(DecomposeOutcome {
        synthesis: synthesis.content,
        confidence: synthesis.confidence,
        subtask_results: results,
        total_cost: registry.cumulative_cost().await,
    })
}

/// Resolve `Protocol::Auto` to a concrete protocol by classifying the
/// question; `Unknown` falls back to the deliberative consensus path since
/// that is the more conservative default when the signal is ambiguous.
pub async fn resolve_auto_protocol(
    question: &str,
    registry: &ProviderRegistry,
    config: &EngineConfig,
    cancellation: &CancellationToken,
) -> Protocol {
    match config.protocol {
        Protocol::Auto => match classify_task_type(question, registry, config, cancellation).await {
            TaskType::Judgment => Protocol::Voting,
            TaskType::Reasoning | TaskType::Unknown => Protocol::Consensus,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MockProvider, ModelInfo, Provider};
    use std::sync::Arc;

    fn info(model: &str) -> ModelInfo {
        ModelInfo {
            provider_id: "p".to_string(),
            model_id: model.to_string(),
            input_cost_per_mtok: 1.0,
            output_cost_per_mtok: 1.0,
            proposer_eligible: true,
        }
    }

    #[tokio::test]
    async fn run_consensus_returns_decision_on_success() {
        let registry = ProviderRegistry::new(0.0);
        let provider: Arc<dyn Provider> = Arc::new(
            MockProvider::new("p")
                .with_model(info("a"))
                .with_model(info("b"))
                .with_response("a", "proposal")
                .with_response("b", "the answer gets wrong something"),
        );
        registry.register(provider).await.unwrap();
        let config = EngineConfig { max_rounds: 1, ..EngineConfig::default() };

        let outcome =
            run_consensus("q", &registry, &config, &CancellationToken::new(), None, None, None).await;
        assert!(outcome.decision.is_some());
        assert!(outcome.confidence > 0.0);
    }

    #[tokio::test]
    async fn resolve_auto_protocol_defaults_to_consensus_for_non_auto() {
        let registry = ProviderRegistry::new(0.0);
        let config = EngineConfig { protocol: Protocol::Voting, ..EngineConfig::default() };
        assert_eq!(
            resolve_auto_protocol("q", &registry, &config, &CancellationToken::new()).await,
            Protocol::Voting
        );
    }
}
