//! Voting protocol — parallel single-turn fan-out plus meta-judge
//! aggregation. The alternative to a full consensus deliberation for
//! questions classified as judgment calls rather than open-ended reasoning.

use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::config::{AggregationStrategy as ConfigAggregation, EngineConfig};
use crate::error::ConsensusError;
use crate::provider::{self, Message, ModelInfo, ResponseFormat};
use crate::registry::ProviderRegistry;
use crate::types::{AggregationStrategy, VoteResult, VotingAggregation};

async fn cast_vote(
    registry: &ProviderRegistry,
    model_info: ModelInfo,
    question: &str,
    config: &EngineConfig,
    cancellation: &CancellationToken,
) -> Result<VoteResult, ConsensusError> {
    let model_ref = model_info.model_ref();
    let messages = vec![Message::user(question.to_string())];
    let (provider_handle, model_id) = registry.get_provider(&model_ref).await?;
    let response = provider::send_with_retry(
        &provider_handle,
        &model_id,
        &messages,
        config.sampling.deliberation_max_tokens,
        config.sampling.deliberation_temperature,
        ResponseFormat::Text,
        cancellation,
    )
    .await?;
    let _ = registry.record_usage(&response.model_info, response.usage).await;
    Ok(VoteResult {
        model_ref: response.model_info.model_ref(),
        content: response.content,
    })
}

async fn judge(
    registry: &ProviderRegistry,
    judge_model: &ModelInfo,
    question: &str,
    votes: &[VoteResult],
    instruction: &str,
    config: &EngineConfig,
    cancellation: &CancellationToken,
) -> Result<String, ConsensusError> {
    let labelled = votes
        .iter()
        .map(|v| format!("Vote from {}:\n{}", v.model_ref, v.content))
        .collect::<Vec<_>>()
        .join("\n\n");
    let messages = vec![
        Message::system(instruction.to_string()),
        Message::user(format!("Question: {question}\n\n{labelled}")),
    ];
    let model_ref = judge_model.model_ref();
    let (provider_handle, model_id) = registry.get_provider(&model_ref).await?;
    let response = provider::send_with_retry(
        &provider_handle,
        &model_id,
        &messages,
        config.sampling.deliberation_max_tokens,
        config.sampling.deliberation_temperature,
        ResponseFormat::Text,
        cancellation,
    )
    .await?;
    registry.record_usage(&response.model_info, response.usage).await?;
    Ok(response.content)
}

fn strongest(models: &[ModelInfo]) -> Option<&ModelInfo> {
    models.iter().max_by(|a, b| {
        a.output_cost_per_mtok
            .partial_cmp(&b.output_cost_per_mtok)
            .unwrap_or(std::cmp::Ordering::Equal)
    })
}

/// Run the voting protocol over every eligible model.
///
/// Degenerate cases: zero votes returns an empty aggregation; exactly one
/// vote returns it directly at confidence 1.0 without a second, meta-judge
/// call. Two or more votes call the strongest model a second time (it
/// already voted once) to produce the aggregate decision.
pub async fn run_voting(
    question: &str,
    registry: &ProviderRegistry,
    aggregation: ConfigAggregation,
    panel: Option<&[String]>,
    config: &EngineConfig,
    cancellation: &CancellationToken,
) -> Result<VotingAggregation, ConsensusError> {
    let eligible = registry.eligible_models(panel).await;
    if eligible.is_empty() {
        return Err(ConsensusError::insufficient_models("no models available"));
    }

    let futures = eligible
        .iter()
        .cloned()
        .map(|model_info| cast_vote(registry, model_info, question, config, cancellation));
    let results = join_all(futures).await;

    if results.iter().any(|r| matches!(r, Err(ConsensusError::Cancelled))) {
        return Err(ConsensusError::Cancelled);
    }
    let votes: Vec<VoteResult> = results.into_iter().filter_map(Result::ok).collect();

    match votes.len() {
        0 => Ok(VotingAggregation::empty()),
        1 => {
            let vote = votes.into_iter().next().unwrap();
            Ok(VotingAggregation {
                decision: vote.content.clone(),
                confidence: 1.0,
                strategy: None,
                votes: vec![vote],
            })
        }
        _ => {
            let judge_model = strongest(&eligible)
                .ok_or_else(|| ConsensusError::insufficient_models("no models available"))?;
            let (instruction, confidence, strategy) = match aggregation {
                ConfigAggregation::Majority => (
                    "Pick the single best answer among the votes below and return it verbatim.",
                    0.8,
                    AggregationStrategy::Majority,
                ),
                ConfigAggregation::Weighted => (
                    "Synthesise a weighted merge of the votes below, giving more weight to the \
                     more thorough and specific answers.",
                    0.85,
                    AggregationStrategy::Weighted,
                ),
            };
            let decision =
                judge(registry, judge_model, question, &votes, instruction, config, cancellation).await?;
            Ok(VotingAggregation {
                decision,
                confidence,
                strategy: Some(strategy),
                votes,
            })
        }
    }
}
