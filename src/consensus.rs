//! The consensus deliberation loop — drives the phase graph through rounds
//! of Propose/Challenge/Revise/Commit until convergence or round exhaustion.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::context::DeliberationContext;
use crate::convergence;
use crate::error::ConsensusError;
use crate::phase::{self, Phase};
use crate::phases::{challenge, commit, propose, revise};
use crate::provider::ToolRegistry;
use crate::registry::ProviderRegistry;

/// Options narrowing which models participate and whether to attempt
/// best-effort decision classification at Commit.
#[derive(Debug, Clone, Default)]
pub struct DeliberationOptions {
    pub panel: Option<Vec<String>>,
    pub classify: bool,
    pub reviser_override: Option<String>,
}

/// Run one full deliberation to completion (or failure/cancellation).
pub async fn run(
    question: &str,
    max_rounds: u32,
    registry: &ProviderRegistry,
    options: &DeliberationOptions,
    config: &EngineConfig,
    cancellation: &CancellationToken,
    tool_registry: Option<&dyn ToolRegistry>,
) -> DeliberationContext {
    let mut ctx = DeliberationContext::new(question, max_rounds);
    let panel = options.panel.as_deref();

    if cancellation.is_cancelled() {
        ctx.fail(ConsensusError::Cancelled.to_string());
        return ctx;
    }

    if let Err(e) = phase::apply(&mut ctx, Phase::Propose) {
        ctx.fail(e.to_string());
        return ctx;
    }

    loop {
        info!(round = ctx.current_round, phase = %ctx.phase, "entering round");

        if run_round(&mut ctx, registry, panel, options, config, cancellation, tool_registry)
            .await
            .is_err()
        {
            return ctx;
        }

        if ctx.phase == Phase::Complete {
            debug!(total_cost = "see registry", "deliberation complete");
            return ctx;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_round(
    ctx: &mut DeliberationContext,
    registry: &ProviderRegistry,
    panel: Option<&[String]>,
    options: &DeliberationOptions,
    config: &EngineConfig,
    cancellation: &CancellationToken,
    tool_registry: Option<&dyn ToolRegistry>,
) -> Result<(), ()> {
    macro_rules! checkpoint {
        () => {
            if cancellation.is_cancelled() {
                ctx.fail(ConsensusError::Cancelled.to_string());
                return Err(());
            }
        };
    }

    checkpoint!();
    if let Err(e) = propose::run(ctx, registry, panel, config, cancellation, tool_registry).await {
        ctx.fail(e.to_string());
        return Err(());
    }
    if let Err(e) = phase::apply(ctx, Phase::Challenge) {
        ctx.fail(e.to_string());
        return Err(());
    }

    checkpoint!();
    if let Err(e) = challenge::run(ctx, registry, panel, config, cancellation).await {
        warn!(error = %e, "challenge phase failed");
        ctx.fail(e.to_string());
        return Err(());
    }
    if let Err(e) = phase::apply(ctx, Phase::Revise) {
        ctx.fail(e.to_string());
        return Err(());
    }

    checkpoint!();
    let reviser = options.reviser_override.as_deref();
    if let Err(e) = revise::run(ctx, registry, reviser, config, cancellation, tool_registry).await {
        ctx.fail(e.to_string());
        return Err(());
    }
    if let Err(e) = phase::apply(ctx, Phase::Commit) {
        ctx.fail(e.to_string());
        return Err(());
    }

    checkpoint!();
    if let Err(e) = commit::run(ctx, registry, options.classify, config, cancellation).await {
        ctx.fail(e.to_string());
        return Err(());
    }

    convergence::check(ctx);

    let next = if ctx.converged || ctx.current_round >= ctx.max_rounds {
        Phase::Complete
    } else {
        Phase::Propose
    };
    if let Err(e) = phase::apply(ctx, next) {
        ctx.fail(e.to_string());
        return Err(());
    }

    Ok(())
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
    async fn single_round_converges_by_round_exhaustion() {
        let registry = ProviderRegistry::new(0.0);
        let provider: Arc<dyn Provider> = Arc::new(
            MockProvider::new("p")
                .with_model(info("a"))
                .with_model(info("b"))
                .with_response("a", "the proposal")
                .with_response("b", "the answer gets wrong the cost model"),
        );
        registry.register(provider).await.unwrap();

        let config = EngineConfig::default();
        let options = DeliberationOptions::default();
        let ctx = run("what database?", 1, &registry, &options, &config, &CancellationToken::new(), None).await;

        assert_eq!(ctx.phase, Phase::Complete);
        assert_eq!(ctx.round_history.len(), 1);
        assert!(ctx.decision.is_some());
    }

    #[tokio::test]
    async fn cancellation_before_start_fails_immediately() {
        let registry = ProviderRegistry::new(0.0);
        let config = EngineConfig::default();
        let options = DeliberationOptions::default();
        let token = CancellationToken::new();
        token.cancel();

        let ctx = run("q", 3, &registry, &options, &config, &token, None).await;
        assert_eq!(ctx.phase, Phase::Failed);
        assert_eq!(ctx.error.as_deref(), Some(ConsensusError::Cancelled.to_string().as_str()));
    }

    #[tokio::test]
    async fn failure_in_propose_fails_the_whole_deliberation() {
        let registry = ProviderRegistry::new(0.0);
        let config = EngineConfig::default();
        let options = DeliberationOptions::default();
        let ctx = run("q", 3, &registry, &options, &config, &CancellationToken::new(), None).await;
        assert_eq!(ctx.phase, Phase::Failed);
    }
}
