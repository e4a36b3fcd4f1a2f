//! Scheduler — executes a validated subtask DAG as nested consensus
//! deliberations, respecting topological ordering and optionally running
//! each layer concurrently.

use std::collections::HashMap;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::EngineConfig;
use crate::consensus::{self, DeliberationOptions};
use crate::decompose::topological_order;
use crate::error::ConsensusError;
use crate::registry::ProviderRegistry;
use crate::types::{SubtaskResult, SubtaskSpec};

fn augmented_question(
    parent_question: &str,
    subtask: &SubtaskSpec,
    completed: &HashMap<String, SubtaskResult>,
) -> String {
    let mut question = format!("{parent_question}\n\nYour specific subtask: {}", subtask.description);
    for dep in &subtask.dependencies {
        if let Some(result) = completed.get(dep) {
            question.push_str(&format!("\n\nResult from {}: {}", dep, result.decision));
        }
    }
    question
}

async fn run_node(
    parent_question: &str,
    subtask: &SubtaskSpec,
    completed: &HashMap<String, SubtaskResult>,
    registry: &ProviderRegistry,
    config: &EngineConfig,
    cancellation: &CancellationToken,
) -> Result<SubtaskResult, ConsensusError> {
    let question = augmented_question(parent_question, subtask, completed);
    let options = DeliberationOptions::default();
    let ctx = consensus::run(&question, 1, registry, &options, config, cancellation, None).await;

    let decision = ctx
        .decision
        .ok_or_else(|| ConsensusError::protocol(format!("subtask {} produced no decision", subtask.label)))?;

    Ok(SubtaskResult {
        label: subtask.label.clone(),
        decision,
        confidence: ctx.confidence,
    })
}

/// Execute every subtask, respecting dependency order. Within a topological
/// layer, nodes run concurrently when `parallel` is set; layer boundaries
/// are always serialisation points. Any node failing aborts the whole
/// schedule -- completed siblings' work is discarded.
pub async fn schedule_subtasks(
    parent_question: &str,
    subtasks: &[SubtaskSpec],
    registry: &ProviderRegistry,
    config: &EngineConfig,
    cancellation: &CancellationToken,
) -> Result<Vec<SubtaskResult>, ConsensusError> {
    if subtasks.is_empty() {
        return Err(ConsensusError::protocol("No subtasks"));
    }

    let layers = topological_order(subtasks)
        .ok_or_else(|| ConsensusError::protocol("Cycle detected in subtask dependencies"))?;
    let by_label: HashMap<&str, &SubtaskSpec> = subtasks.iter().map(|s| (s.label.as_str(), s)).collect();

    let mut completed: HashMap<String, SubtaskResult> = HashMap::new();

    for layer in layers {
        info!(layer = ?layer, "scheduling layer");
        if config.decompose.parallel {
            let futures = layer.iter().map(|label| {
                let subtask = by_label[label.as_str()];
                run_node(parent_question, subtask, &completed, registry, config, cancellation)
            });
            let results = join_all(futures).await;
            for result in results {
                let r = result?;
                completed.insert(r.label.clone(), r);
            }
        } else {
            for label in &layer {
                let subtask = by_label[label.as_str()];
                let r = run_node(parent_question, subtask, &completed, registry, config, cancellation).await?;
                completed.insert(r.label.clone(), r);
            }
        }
    }

    Ok(subtasks.iter().map(|s| completed[&s.label].clone()).collect())
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

    fn spec(label: &str, deps: &[&str]) -> SubtaskSpec {
        SubtaskSpec {
            label: label.to_string(),
            description: format!("work on {label}"),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn empty_subtasks_is_rejected() {
        let registry = ProviderRegistry::new(0.0);
        let config = EngineConfig::default();
        let err = schedule_subtasks("q", &[], &registry, &config, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No subtasks"));
    }

    #[tokio::test]
    async fn diamond_dependency_respects_ordering() {
        let registry = ProviderRegistry::new(0.0);
        let provider: Arc<dyn Provider> = Arc::new(
            MockProvider::new("p")
                .with_model(info("a"))
                .with_model(info("b"))
                .with_response("a", "proposal text")
                .with_response("b", "the answer gets wrong something"),
        );
        registry.register(provider).await.unwrap();

        let subtasks = vec![spec("a", &[]), spec("b", &["a"]), spec("c", &["a"]), spec("d", &["b", "c"])];
        let config = EngineConfig::default();
        let results = schedule_subtasks("q", &subtasks, &registry, &config, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(results.len(), 4);
        assert_eq!(results.iter().map(|r| r.label.clone()).collect::<Vec<_>>(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn augmented_question_includes_upstream_results() {
        let mut completed = HashMap::new();
        completed.insert(
            "a".to_string(),
            SubtaskResult {
                label: "a".to_string(),
                decision: "use postgres".to_string(),
                confidence: 0.9,
            },
        );
        let subtask = spec("b", &["a"]);
        let question = augmented_question("parent question", &subtask, &completed);
        assert!(question.contains("use postgres"));
        assert!(question.contains("work on b"));
    }
}
