//! Commit handler — a pure transformation of revision + challenges into a
//! decision, calibrated confidence, and dissent, plus an optional
//! best-effort classification call.

use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::context::DeliberationContext;
use crate::error::ConsensusError;
use crate::phase::Phase;
use crate::provider::{self, Message, ResponseFormat};
use crate::registry::ProviderRegistry;
use crate::types::{ChallengeResult, Taxonomy};

/// `0.5` with no challenges; otherwise `0.5 + (genuine / total) * 0.5` where
/// genuine means non-sycophantic. A fully sycophantic round never clears 0.5
/// -- that's the diagnostic signal that deliberation failed to catch a flaw.
pub fn compute_confidence(challenges: &[ChallengeResult]) -> f64 {
    if challenges.is_empty() {
        return 0.5;
    }
    let genuine = challenges.iter().filter(|c| !c.sycophantic).count();
    0.5 + (genuine as f64 / challenges.len() as f64) * 0.5
}

/// `None` if every challenge was sycophantic, otherwise the genuine
/// challenges joined as `"[model_ref]: content"` blocks.
pub fn extract_dissent(challenges: &[ChallengeResult]) -> Option<String> {
    let genuine: Vec<&ChallengeResult> = challenges.iter().filter(|c| !c.sycophantic).collect();
    if genuine.is_empty() {
        return None;
    }
    Some(
        genuine
            .iter()
            .map(|c| format!("[{}]: {}", c.model_ref, c.content))
            .collect::<Vec<_>>()
            .join("\n\n"),
    )
}

async fn classify_decision(
    question: &str,
    decision: &str,
    registry: &ProviderRegistry,
    config: &EngineConfig,
    cancellation: &CancellationToken,
) -> Option<Taxonomy> {
    let eligible = registry.eligible_models(None).await;
    let cheapest = eligible.into_iter().min_by(|a, b| {
        a.input_cost_per_mtok
            .partial_cmp(&b.input_cost_per_mtok)
            .unwrap_or(std::cmp::Ordering::Equal)
    })?;
    let model_ref = cheapest.model_ref();

    let messages = vec![
        Message::system(
            "Classify the following question and its answer. Respond with JSON containing \
             \"intent\" (one of factual, judgment, creative, strategic, technical), \"category\" \
             (short topic label), and optionally \"genus\" (a finer label)."
                .to_string(),
        ),
        Message::user(format!("Question: {question}\n\nAnswer: {decision}")),
    ];

    let (provider_handle, model_id) = registry.get_provider(&model_ref).await.ok()?;
    let response = provider::send_with_retry(
        &provider_handle,
        &model_id,
        &messages,
        config.sampling.classification_max_tokens,
        config.sampling.classification_temperature,
        ResponseFormat::Json,
        cancellation,
    )
    .await
    .ok()?;
    let _ = registry.record_usage(&response.model_info, response.usage).await;

    let value = crate::provider::extract_json(&response.content).ok()?;
    let intent = value.get("intent")?.as_str()?.to_string();
    let category = value.get("category")?.as_str()?.to_string();
    let genus = value.get("genus").and_then(|v| v.as_str()).map(|s| s.to_string());

    Some(Taxonomy { intent, category, genus })
}

pub async fn run(
    ctx: &mut DeliberationContext,
    registry: &ProviderRegistry,
    classify: bool,
    config: &EngineConfig,
    cancellation: &CancellationToken,
) -> Result<(), ConsensusError> {
    if ctx.phase != Phase::Commit {
        return Err(ConsensusError::protocol("commit requires Commit phase"));
    }
    let revision = ctx
        .revision
        .clone()
        .ok_or_else(|| ConsensusError::protocol("no revision set"))?;

    ctx.decision = Some(revision.clone());
    ctx.confidence = compute_confidence(&ctx.challenges);
    ctx.dissent = extract_dissent(&ctx.challenges);

    if classify {
        ctx.taxonomy = classify_decision(&ctx.question, &revision, registry, config, cancellation).await;
    }

    Ok(())
}
