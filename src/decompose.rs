//! Decomposition — splitting a question into a validated dependency DAG of
//! subtasks via a single model call.

use std::collections::{HashMap, HashSet};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::ConsensusError;
use crate::provider::{self, Message, ResponseFormat};
use crate::registry::ProviderRegistry;
use crate::types::SubtaskSpec;

fn build_decompose_prompt(question: &str, max_subtasks: usize) -> Vec<Message> {
    let system = format!(
        "Decompose the question into between 2 and {max_subtasks} independent subtasks. \
         Respond with JSON: {{\"subtasks\": [{{\"label\": str, \"description\": str, \
         \"dependencies\": [str]}}]}}. The dependency graph must be acyclic -- a subtask may \
         only depend on subtasks that come before it."
    );
    vec![Message::system(system), Message::user(question.to_string())]
}

fn parse_subtasks(raw: &serde_json::Value) -> Result<Vec<SubtaskSpec>, ConsensusError> {
    let array = raw
        .get("subtasks")
        .ok_or_else(|| ConsensusError::protocol("response is missing \"subtasks\""))?
        .as_array()
        .ok_or_else(|| ConsensusError::protocol("\"subtasks\" is not a JSON array"))?;

    let mut subtasks = Vec::with_capacity(array.len());
    for item in array {
        let obj = item
            .as_object()
            .ok_or_else(|| ConsensusError::protocol("subtask entry is not a JSON object"))?;
        let label = obj
            .get("label")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ConsensusError::protocol("subtask entry is missing \"label\""))?
            .to_string();
        let description = obj
            .get("description")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ConsensusError::protocol("subtask entry is missing \"description\""))?
            .to_string();
        let dependencies = match obj.get("dependencies") {
            None => Vec::new(),
            Some(deps) => deps
                .as_array()
                .ok_or_else(|| ConsensusError::protocol("\"dependencies\" is not a JSON array"))?
                .iter()
                .map(|d| {
                    d.as_str()
                        .map(|s| s.to_string())
                        .ok_or_else(|| ConsensusError::protocol("non-string dependency in \"dependencies\""))
                })
                .collect::<Result<Vec<_>, _>>()?,
        };
        subtasks.push(SubtaskSpec { label, description, dependencies });
    }
    Ok(subtasks)
}

/// Validate a subtask list as a well-formed DAG within the configured size
/// bounds. Errors in a fixed order, so the first violated rule is the one
/// reported.
pub fn validate_subtask_dag(subtasks: &[SubtaskSpec], max_subtasks: usize) -> Result<(), ConsensusError> {
    if subtasks.len() < 2 {
        return Err(ConsensusError::protocol("Too few subtasks: need at least 2"));
    }
    if subtasks.len() > max_subtasks {
        return Err(ConsensusError::protocol(format!(
            "Too many subtasks: got {}, max is {max_subtasks}",
            subtasks.len()
        )));
    }

    let mut labels = HashSet::new();
    for s in subtasks {
        if !labels.insert(s.label.as_str()) {
            return Err(ConsensusError::protocol(format!("Duplicate label: {}", s.label)));
        }
    }

    for s in subtasks {
        if s.dependencies.contains(&s.label) {
            return Err(ConsensusError::protocol(format!("self-dependency on label {}", s.label)));
        }
        for dep in &s.dependencies {
            if !labels.contains(dep.as_str()) {
                return Err(ConsensusError::protocol(format!("unknown label in dependencies: {dep}")));
            }
        }
    }

    if topological_order(subtasks).is_none() {
        return Err(ConsensusError::protocol("Cycle detected in subtask dependencies"));
    }

    Ok(())
}

/// Builds the dependency graph (edge dep -> dependent) and confirms it is
/// acyclic via [`petgraph::algo::toposort`], returning `None` on a cycle.
/// Used both for validation and, via [`crate::scheduler`], to compute
/// execution layers.
pub fn topological_order(subtasks: &[SubtaskSpec]) -> Option<Vec<Vec<String>>> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();
    for s in subtasks {
        nodes.insert(s.label.as_str(), graph.add_node(s.label.as_str()));
    }
    for s in subtasks {
        let to = nodes[s.label.as_str()];
        for dep in &s.dependencies {
            if let Some(&from) = nodes.get(dep.as_str()) {
                graph.add_edge(from, to, ());
            }
        }
    }

    if petgraph::algo::toposort(&graph, None).is_err() {
        return None;
    }

    // Peel off layers of zero remaining in-degree, same graph, so that
    // independent subtasks land in the same layer rather than an arbitrary
    // total order.
    let mut remaining: HashSet<NodeIndex> = graph.node_indices().collect();
    let mut layers = Vec::new();

    while !remaining.is_empty() {
        let mut ready: Vec<NodeIndex> = remaining
            .iter()
            .copied()
            .filter(|&idx| {
                graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .all(|pred| !remaining.contains(&pred))
            })
            .collect();
        if ready.is_empty() {
            return None;
        }
        ready.sort_by_key(|&idx| graph[idx]);
        for idx in &ready {
            remaining.remove(idx);
        }
        layers.push(ready.iter().map(|&idx| graph[idx].to_string()).collect::<Vec<_>>());
    }

    Some(layers)
}

/// One call to the cheapest eligible model, in JSON mode, asking it to
/// decompose the question. Strict parsing and DAG validation both happen
/// here, so a cycle in the model's own output still raises.
pub async fn decompose(
    question: &str,
    registry: &ProviderRegistry,
    config: &EngineConfig,
    cancellation: &CancellationToken,
) -> Result<Vec<SubtaskSpec>, ConsensusError> {
    let eligible = registry.eligible_models(None).await;
    let cheapest = eligible
        .iter()
        .min_by(|a, b| {
            a.input_cost_per_mtok
                .partial_cmp(&b.input_cost_per_mtok)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .ok_or_else(|| ConsensusError::insufficient_models("no models available"))?
        .clone();

    let messages = build_decompose_prompt(question, config.decompose.max_subtasks);
    let (provider_handle, model_id) = registry.get_provider(&cheapest.model_ref()).await?;
    let response = provider::send_with_retry(
        &provider_handle,
        &model_id,
        &messages,
        config.sampling.deliberation_max_tokens,
        config.sampling.classification_temperature,
        ResponseFormat::Json,
        cancellation,
    )
    .await?;
    registry.record_usage(&response.model_info, response.usage).await?;

    let parsed = crate::provider::extract_json(&response.content)?;
    let subtasks = parse_subtasks(&parsed)?;
    validate_subtask_dag(&subtasks, config.decompose.max_subtasks)?;
    Ok(subtasks)
}
