//! Revise handler.

use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::context::DeliberationContext;
use crate::error::ConsensusError;
use crate::phase::Phase;
use crate::provider::{self, Message, ModelResponse, ResponseFormat, ToolRegistry};
use crate::registry::ProviderRegistry;

const REVISER_SYSTEM: &str = "You are a thoughtful expert advisor. You gave an initial answer to \
    a question, and independent experts have challenged several points. Produce an improved \
    final answer that: 1. Addresses each valid challenge directly 2. Maintains your correct \
    points with stronger justification 3. Incorporates new perspectives where they improve the \
    answer 4. Pushes back on challenges that are wrong, explaining why. Do not mention the \
    debate process. Just give the best possible answer.";

pub fn build_prompt(ctx: &DeliberationContext, proposal: &str) -> Vec<Message> {
    let challenges_text = ctx
        .challenges
        .iter()
        .map(|c| format!("Challenge from {}:\n{}", c.model_ref, c.content))
        .collect::<Vec<_>>()
        .join("\n\n");
    let user = format!(
        "Question: {question}\n\nYour original answer:\n{proposal}\n\nIndependent expert \
         challenges:\n{challenges_text}\n\nProduce your improved final answer:",
        question = ctx.question,
    );
    let system = format!("{}\n\n{}", super::grounding_prefix(), REVISER_SYSTEM);
    vec![Message::system(system), Message::user(user)]
}

/// Revise the proposal, optionally against a caller-supplied reviser model.
/// Defaults to the proposer reviewing its own work, per the original
/// behavior: the proposer owns the answer it is being asked to improve.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    ctx: &mut DeliberationContext,
    registry: &ProviderRegistry,
    model_ref: Option<&str>,
    config: &EngineConfig,
    cancellation: &CancellationToken,
    tool_registry: Option<&dyn ToolRegistry>,
) -> Result<ModelResponse, ConsensusError> {
    if ctx.phase != Phase::Revise {
        return Err(ConsensusError::protocol("revise requires Revise phase"));
    }
    let proposal = ctx
        .proposal
        .clone()
        .ok_or_else(|| ConsensusError::protocol("no proposal set"))?;
    if ctx.challenges.is_empty() {
        return Err(ConsensusError::protocol("no challenges received"));
    }

    let reviser_ref = model_ref
        .map(|s| s.to_string())
        .or_else(|| ctx.proposal_model.clone())
        .ok_or_else(|| ConsensusError::protocol("no reviser model available"))?;

    let messages = build_prompt(ctx, &proposal);
    let (provider_handle, model_id) = registry.get_provider(&reviser_ref).await?;
    let response = match tool_registry {
        Some(tools) => {
            provider::tool_augmented_send(
                &provider_handle,
                &model_id,
                messages,
                config.sampling.deliberation_max_tokens,
                config.sampling.deliberation_temperature,
                ResponseFormat::Text,
                cancellation,
                tools,
                &mut ctx.tool_calls_log,
            )
            .await?
        }
        None => {
            provider::send_with_retry(
                &provider_handle,
                &model_id,
                &messages,
                config.sampling.deliberation_max_tokens,
                config.sampling.deliberation_temperature,
                ResponseFormat::Text,
                cancellation,
            )
            .await?
        }
    };
    registry.record_usage(&response.model_info, response.usage).await?;

    ctx.revision = Some(response.content.clone());
    ctx.revision_model = Some(reviser_ref);

    Ok(response)
}
