//! Challenge handler — parallel adversarial fan-out against the proposal.

use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::context::DeliberationContext;
use crate::error::ConsensusError;
use crate::phase::Phase;
use crate::provider::{self, Message, ModelInfo, ModelResponse, ResponseFormat};
use crate::registry::ProviderRegistry;
use crate::sycophancy::{detect_sycophancy, ChallengeFraming};
use crate::types::ChallengeResult;

fn framing_system_prompt(framing: ChallengeFraming) -> String {
    format!(
        "{}\n\nYou are reviewing another expert's answer. Identify {}. CRITICAL INSTRUCTIONS: Do \
         NOT start with praise such as \"This is a good answer\" or similar validation. Open with \
         something like \"{}\"",
        super::grounding_prefix(),
        framing.requirement(),
        framing.suggested_opening(),
    )
}

/// Non-proposer models sorted by descending output cost, padded with the
/// proposer itself if fewer than `count` distinct challengers exist.
pub fn select_challengers<'a>(
    eligible: &'a [ModelInfo],
    proposer_ref: &str,
    count: usize,
) -> Vec<&'a ModelInfo> {
    let mut others: Vec<&ModelInfo> = eligible.iter().filter(|m| m.model_ref() != proposer_ref).collect();
    others.sort_by(|a, b| {
        b.output_cost_per_mtok
            .partial_cmp(&a.output_cost_per_mtok)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut chosen: Vec<&ModelInfo> = others.into_iter().take(count).collect();

    if chosen.len() < count {
        if let Some(proposer) = eligible.iter().find(|m| m.model_ref() == proposer_ref) {
            while chosen.len() < count {
                chosen.push(proposer);
            }
        }
    }
    chosen
}

fn build_prompt(question: &str, proposal: &str, framing: ChallengeFraming) -> Vec<Message> {
    let system = framing_system_prompt(framing);
    let user = format!(
        "Question: {question}\n\nAnswer from another expert (do NOT defer to this -- challenge \
         it):\n{proposal}"
    );
    vec![Message::system(system), Message::user(user)]
}

async fn call_challenger(
    registry: &ProviderRegistry,
    model_info: ModelInfo,
    question: &str,
    proposal: &str,
    framing: ChallengeFraming,
    config: &EngineConfig,
    cancellation: &CancellationToken,
) -> Result<(ModelResponse, ChallengeFraming), ConsensusError> {
    let model_ref = model_info.model_ref();
    let messages = build_prompt(question, proposal, framing);
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
    Ok((response, framing))
}

pub async fn run(
    ctx: &mut DeliberationContext,
    registry: &ProviderRegistry,
    panel: Option<&[String]>,
    config: &EngineConfig,
    cancellation: &CancellationToken,
) -> Result<(), ConsensusError> {
    if ctx.phase != Phase::Challenge {
        return Err(ConsensusError::protocol("challenge requires Challenge phase"));
    }
    let proposal = ctx
        .proposal
        .clone()
        .ok_or_else(|| ConsensusError::protocol("no proposal set"))?;
    let proposer_ref = ctx.proposal_model.clone().unwrap_or_default();

    let eligible = registry.eligible_models(panel).await;
    let challengers = select_challengers(&eligible, &proposer_ref, config.challenge_count);
    if challengers.is_empty() {
        return Err(ConsensusError::insufficient_models("no challenger models available"));
    }

    let question = ctx.question.clone();
    // Each future races its own call against `cancellation` via
    // `send_with_retry`, so cancelling mid fan-out stops every challenger --
    // including ones whose turn in the join hasn't actually polled yet --
    // rather than only the one in flight when the flag is checked.
    let futures = challengers.into_iter().enumerate().map(|(i, model_info)| {
        let framing = ChallengeFraming::for_index(i);
        call_challenger(registry, model_info.clone(), &question, &proposal, framing, config, cancellation)
    });

    let results = join_all(futures).await;

    if results.iter().any(|r| matches!(r, Err(ConsensusError::Cancelled))) {
        return Err(ConsensusError::Cancelled);
    }

    let mut challenges = Vec::with_capacity(results.len());
    for result in results {
        match result {
            Ok((response, framing)) => {
                let sycophantic = detect_sycophancy(&response.content);
                challenges.push(ChallengeResult {
                    model_ref: response.model_info.model_ref(),
                    content: response.content,
                    sycophantic,
                    framing,
                });
            }
            Err(_) => continue,
        }
    }

    if challenges.is_empty() {
        return Err(ConsensusError::protocol("All challengers failed"));
    }

    ctx.challenges = challenges;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MockProvider, Provider};
    use std::sync::Arc;

    fn info(model: &str, cost: f64) -> ModelInfo {
        ModelInfo {
            provider_id: "p".to_string(),
            model_id: model.to_string(),
            input_cost_per_mtok: 1.0,
            output_cost_per_mtok: cost,
            proposer_eligible: true,
        }
    }

    #[test]
    fn select_challengers_excludes_proposer_and_sorts_by_cost() {
        let models = vec![info("proposer", 10.0), info("cheap", 1.0), info("mid", 5.0)];
        let chosen = select_challengers(&models, "p:proposer", 2);
        assert_eq!(chosen.len(), 2);
        assert_eq!(chosen[0].model_id, "mid");
        assert_eq!(chosen[1].model_id, "cheap");
    }

    #[test]
    fn select_challengers_pads_with_proposer_when_too_few_models() {
        let models = vec![info("proposer", 10.0)];
        let chosen = select_challengers(&models, "p:proposer", 2);
        assert_eq!(chosen.len(), 2);
        assert!(chosen.iter().all(|m| m.model_id == "proposer"));
    }

    #[tokio::test]
    async fn run_requires_proposal_set() {
        let registry = ProviderRegistry::new(0.0);
        let mut ctx = DeliberationContext::new("q", 3);
        ctx.phase = Phase::Challenge;
        let config = EngineConfig::default();
        let err = run(&mut ctx, &registry, None, &config, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ConsensusError::Protocol(_)));
    }

    #[tokio::test]
    async fn run_fans_out_and_assigns_framings_round_robin() {
        let registry = ProviderRegistry::new(0.0);
        let provider: Arc<dyn Provider> = Arc::new(
            MockProvider::new("p")
                .with_model(info("a", 10.0))
                .with_model(info("b", 5.0))
                .with_response("a", "The answer gets wrong the cost model.")
                .with_response("b", "An alternative approach is caching."),
        );
        registry.register(provider).await.unwrap();

        let mut ctx = DeliberationContext::new("q", 3);
        ctx.phase = Phase::Challenge;
        ctx.proposal = Some("proposal text".to_string());
        ctx.proposal_model = Some("p:nonexistent".to_string());
        let mut config = EngineConfig::default();
        config.challenge_count = 2;

        run(&mut ctx, &registry, None, &config, &CancellationToken::new()).await.unwrap();
        assert_eq!(ctx.challenges.len(), 2);
        assert_eq!(ctx.challenges[0].framing, ChallengeFraming::Flaw);
        assert_eq!(ctx.challenges[1].framing, ChallengeFraming::Alternative);
        assert!(!ctx.challenges[0].sycophantic);
    }

    #[tokio::test]
    async fn run_absorbs_individual_failures() {
        let registry = ProviderRegistry::new(0.0);
        // Only register one real model but request two challengers by padding.
        let provider: Arc<dyn Provider> = Arc::new(
            MockProvider::new("p").with_model(info("a", 10.0)).with_response("a", "a flaw here"),
        );
        registry.register(provider).await.unwrap();
        registry.set_provider_rate_limit("p", 1).await.unwrap();

        let mut ctx = DeliberationContext::new("q", 3);
        ctx.phase = Phase::Challenge;
        ctx.proposal = Some("proposal".to_string());
        ctx.proposal_model = Some("p:other".to_string());
        let mut config = EngineConfig::default();
        config.challenge_count = 2;

        // Rate limit of 1 means the padded duplicate call should fail while
        // the first succeeds -- the phase should still succeed overall.
        let result = run(&mut ctx, &registry, None, &config, &CancellationToken::new()).await;
        assert!(result.is_ok());
        assert_eq!(ctx.challenges.len(), 1);
    }

    #[tokio::test]
    async fn run_fails_with_cancelled_when_token_is_already_cancelled() {
        let registry = ProviderRegistry::new(0.0);
        let provider: Arc<dyn Provider> = Arc::new(
            MockProvider::new("p")
                .with_model(info("a", 10.0))
                .with_model(info("b", 5.0))
                .with_response("a", "a flaw")
                .with_response("b", "an alternative"),
        );
        registry.register(provider).await.unwrap();

        let mut ctx = DeliberationContext::new("q", 3);
        ctx.phase = Phase::Challenge;
        ctx.proposal = Some("proposal".to_string());
        ctx.proposal_model = Some("p:nonexistent".to_string());
        let mut config = EngineConfig::default();
        config.challenge_count = 2;

        let token = CancellationToken::new();
        token.cancel();
        let err = run(&mut ctx, &registry, None, &config, &token).await.unwrap_err();
        assert!(matches!(err, ConsensusError::Cancelled));
    }
}
