//! Synthesis — merges subtask results into one answer using the strongest
//! available model.

use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::ConsensusError;
use crate::provider::{self, Message, ModelInfo, ResponseFormat};
use crate::registry::ProviderRegistry;
use crate::types::{SubtaskResult, SynthesisResult};
pub use crate::types::SynthesisStrategy;

fn strongest(models: &[ModelInfo]) -> Option<&ModelInfo> {
    models.iter().max_by(|a, b| {
        a.output_cost_per_mtok
            .partial_cmp(&b.output_cost_per_mtok)
            .unwrap_or(std::cmp::Ordering::Equal)
    })
}

fn build_merge_prompt(question: &str, results: &[SubtaskResult]) -> Vec<Message> {
    let body = results
        .iter()
        .map(|r| format!("Subtask {} (confidence {:.2}):\n{}", r.label, r.confidence, r.decision))
        .collect::<Vec<_>>()
        .join("\n\n");
    vec![
        Message::system(
            "Synthesize and combine the subtask results below into one coherent answer to the \
             original question."
                .to_string(),
        ),
        Message::user(format!("Question: {question}\n\n{body}")),
    ]
}

fn build_prioritize_prompt(question: &str, results: &[SubtaskResult]) -> Vec<Message> {
    let mut sorted: Vec<&SubtaskResult> = results.iter().collect();
    sorted.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
    let body = sorted
        .iter()
        .map(|r| format!("Subtask {} (confidence {:.2}):\n{}", r.label, r.confidence, r.decision))
        .collect::<Vec<_>>()
        .join("\n\n");
    vec![
        Message::system(
            "Combine the subtask results below into one answer, prioritising by confidence -- \
             give more weight to higher-confidence results when they conflict."
                .to_string(),
        ),
        Message::user(format!("Question: {question}\n\n{body}")),
    ]
}

pub async fn synthesize(
    question: &str,
    results: &[SubtaskResult],
    registry: &ProviderRegistry,
    strategy: SynthesisStrategy,
    config: &EngineConfig,
    cancellation: &CancellationToken,
) -> Result<SynthesisResult, ConsensusError> {
    if results.is_empty() {
        return Err(ConsensusError::protocol("No subtask results"));
    }
    let eligible = registry.eligible_models(None).await;
    let model = strongest(&eligible)
        .ok_or_else(|| ConsensusError::insufficient_models("No models available"))?
        .clone();

    let messages = match strategy {
        SynthesisStrategy::Merge => build_merge_prompt(question, results),
        SynthesisStrategy::Prioritize => build_prioritize_prompt(question, results),
    };

    let (provider_handle, model_id) = registry.get_provider(&model.model_ref()).await?;
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

    let confidence = results.iter().map(|r| r.confidence).sum::<f64>() / results.len() as f64;

    Ok(SynthesisResult {
        content: response.content,
        confidence,
        strategy,
    })
}
