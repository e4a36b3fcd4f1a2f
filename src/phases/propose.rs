//! Propose handler.

use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::context::DeliberationContext;
use crate::error::ConsensusError;
use crate::phase::Phase;
use crate::provider::{self, Message, ModelInfo, ModelResponse, ResponseFormat, ToolRegistry};
use crate::registry::ProviderRegistry;

const PROPOSER_SYSTEM: &str = "You are a thoughtful expert advisor. Answer the question \
    thoroughly, considering multiple angles, trade-offs, and practical implications. Be specific \
    and concrete -- cite examples, give numbers where possible, and explain your reasoning. Do \
    not hedge excessively or give generic advice.";

/// Pick the proposer: the costliest eligible model, used as a capability
/// proxy in the absence of a real benchmark signal.
pub fn select_proposer(eligible: &[ModelInfo]) -> Result<&ModelInfo, ConsensusError> {
    eligible
        .iter()
        .filter(|m| m.proposer_eligible)
        .max_by(|a, b| {
            a.output_cost_per_mtok
                .partial_cmp(&b.output_cost_per_mtok)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .ok_or_else(|| ConsensusError::insufficient_models("no proposer-eligible model available"))
}

pub fn build_prompt(ctx: &DeliberationContext) -> Vec<Message> {
    let system = format!("{}\n\n{}", super::grounding_prefix(), PROPOSER_SYSTEM);
    let user = match ctx.previous_round() {
        None => ctx.question.clone(),
        Some(prev) => {
            let challenges_text = prev
                .challenges
                .iter()
                .map(|c| format!("Challenge from {}:\n{}", c.model_ref, c.content))
                .collect::<Vec<_>>()
                .join("\n\n");
            format!(
                "{question}\n\nIn a previous round, the answer was:\n{decision}\n\nIt received \
                 these challenges:\n{challenges}\n\nProduce an improved answer that addresses \
                 the valid challenges.",
                question = ctx.question,
                decision = prev.decision.clone().unwrap_or_default(),
                challenges = challenges_text,
            )
        }
    };
    vec![Message::system(system), Message::user(user)]
}

#[allow(clippy::too_many_arguments)]
pub async fn run(
    ctx: &mut DeliberationContext,
    registry: &ProviderRegistry,
    panel: Option<&[String]>,
    config: &EngineConfig,
    cancellation: &CancellationToken,
    tool_registry: Option<&dyn ToolRegistry>,
) -> Result<ModelResponse, ConsensusError> {
    if ctx.phase != Phase::Propose {
        return Err(ConsensusError::protocol("propose requires Propose phase"));
    }

    let eligible = registry.eligible_models(panel).await;
    let model_info = select_proposer(&eligible)?.clone();
    let model_ref = model_info.model_ref();

    let messages = build_prompt(ctx);
    let (provider_handle, model_id) = registry.get_provider(&model_ref).await?;
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

    ctx.proposal = Some(response.content.clone());
    ctx.proposal_model = Some(model_ref);

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MockProvider, Provider};
    use std::sync::Arc;

    fn info(model_id: &str, output_cost: f64, eligible: bool) -> ModelInfo {
        ModelInfo {
            provider_id: "p".to_string(),
            model_id: model_id.to_string(),
            input_cost_per_mtok: 1.0,
            output_cost_per_mtok: output_cost,
            proposer_eligible: eligible,
        }
    }

    #[test]
    fn select_proposer_picks_costliest_eligible_model() {
        let models = vec![info("cheap", 1.0, true), info("expensive", 10.0, true), info("ineligible", 100.0, false)];
        let chosen = select_proposer(&models).unwrap();
        assert_eq!(chosen.model_id, "expensive");
    }

    #[test]
    fn select_proposer_fails_when_none_eligible() {
        let models = vec![info("a", 1.0, false)];
        assert!(select_proposer(&models).is_err());
    }

    #[test]
    fn round_one_prompt_is_just_the_question() {
        let ctx = DeliberationContext::new("what database should we use?", 3);
        let messages = build_prompt(&ctx);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "what database should we use?");
    }

    #[test]
    fn later_round_prompt_includes_prior_decision_and_challenges() {
        let mut ctx = DeliberationContext::new("q", 3);
        ctx.proposal = Some("old".to_string());
        ctx.decision = Some("old decision".to_string());
        ctx.archive_round();
        let messages = build_prompt(&ctx);
        assert!(messages[1].content.contains("old decision"));
        assert!(messages[1].content.contains("improved answer"));
    }

    #[tokio::test]
    async fn run_requires_propose_phase() {
        let ctx_phase_mismatch = {
            let mut ctx = DeliberationContext::new("q", 3);
            ctx.phase = Phase::Idle;
            ctx
        };
        let registry = ProviderRegistry::new(0.0);
        let mut ctx = ctx_phase_mismatch;
        let config = EngineConfig::default();
        let err = run(&mut ctx, &registry, None, &config, &CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ConsensusError::Protocol(_)));
    }

    #[tokio::test]
    async fn run_sets_proposal_and_model() {
        let registry = ProviderRegistry::new(0.0);
        let provider: Arc<dyn Provider> = Arc::new(
            MockProvider::new("p").with_model(info("m", 5.0, true)).with_response("m", "use postgres"),
        );
        registry.register(provider).await.unwrap();

        let mut ctx = DeliberationContext::new("q", 3);
        ctx.phase = Phase::Propose;
        let config = EngineConfig::default();
        run(&mut ctx, &registry, None, &config, &CancellationToken::new(), None).await.unwrap();

        assert_eq!(ctx.proposal.as_deref(), Some("use postgres"));
        assert_eq!(ctx.proposal_model.as_deref(), Some("p:m"));
    }
}
