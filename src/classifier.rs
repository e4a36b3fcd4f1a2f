//! Task-type classifier used by the `auto` protocol to route between
//! consensus deliberation and the flat voting protocol.

use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::provider::{self, Message, ResponseFormat};
use crate::registry::ProviderRegistry;
use crate::types::TaskType;

/// Best-effort classification via the cheapest registered model. Any
/// failure mode -- no models, a provider error, unparseable JSON, an
/// unrecognised `task_type` value, or cancellation -- degrades to `Unknown`
/// rather than propagating, since this only affects routing, not
/// correctness.
pub async fn classify_task_type(
    question: &str,
    registry: &ProviderRegistry,
    config: &EngineConfig,
    cancellation: &CancellationToken,
) -> TaskType {
    let eligible = registry.eligible_models(None).await;
    let Some(cheapest) = eligible.iter().min_by(|a, b| {
        a.input_cost_per_mtok
            .partial_cmp(&b.input_cost_per_mtok)
            .unwrap_or(std::cmp::Ordering::Equal)
    }) else {
        return TaskType::Unknown;
    };

    let messages = vec![
        Message::system(
            "Classify the following question as \"reasoning\" (open-ended, benefits from \
             iterative critique) or \"judgment\" (a call among known options, benefits from \
             independent votes). Respond with JSON: {\"task_type\": \"reasoning\"|\"judgment\"}."
                .to_string(),
        ),
        Message::user(question.to_string()),
    ];

    let Ok((provider_handle, model_id)) = registry.get_provider(&cheapest.model_ref()).await else {
        return TaskType::Unknown;
    };
    let Ok(response) = provider::send_with_retry(
        &provider_handle,
        &model_id,
        &messages,
        config.sampling.classification_max_tokens,
        config.sampling.classification_temperature,
        ResponseFormat::Json,
        cancellation,
    )
    .await
    else {
        return TaskType::Unknown;
    };
    let _ = registry.record_usage(&response.model_info, response.usage).await;

    let Ok(value) = crate::provider::extract_json(&response.content) else {
        return TaskType::Unknown;
    };
    match value.get("task_type").and_then(|v| v.as_str()) {
        Some("reasoning") => TaskType::Reasoning,
        Some("judgment") => TaskType::Judgment,
        _ => TaskType::Unknown,
    }
}
