//! Provider Registry — model lookup, per-provider rate limiting, and
//! cumulative cost accounting.
//!
//! The registry is the one piece of state genuinely shared across concurrent
//! deliberations, so every mutating path takes the internal lock for as
//! short a span as possible and never holds it across a provider call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::error::ConsensusError;
use crate::provider::{ModelInfo, Provider, Usage};

const RATE_WINDOW: Duration = Duration::from_secs(60);

struct ProviderEntry {
    provider: Arc<dyn Provider>,
    rate_limit: u32,
    request_timestamps: Vec<Instant>,
}

#[derive(Default)]
struct RegistryState {
    providers: HashMap<String, ProviderEntry>,
    cumulative_cost: f64,
}

impl RegistryState {
    fn prune_and_count(entry: &mut ProviderEntry, now: Instant) -> usize {
        entry
            .request_timestamps
            .retain(|ts| now.duration_since(*ts) < RATE_WINDOW);
        entry.request_timestamps.len()
    }
}

/// Registers providers, resolves model references, and enforces per-provider
/// rate limits and a cumulative cost ceiling.
pub struct ProviderRegistry {
    state: Mutex<RegistryState>,
    cost_hard_limit: f64,
}

impl ProviderRegistry {
    pub fn new(cost_hard_limit: f64) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            cost_hard_limit,
        }
    }

    /// Register a provider. Idempotent registration is rejected rather than
    /// silently accepted so callers notice a wiring bug instead of
    /// double-counting that provider's models.
    pub async fn register(&self, provider: Arc<dyn Provider>) -> Result<(), ConsensusError> {
        let id = provider.provider_id().to_string();
        let mut state = self.state.lock().await;
        if state.providers.contains_key(&id) {
            return Err(ConsensusError::Configuration(format!(
                "provider '{id}' already registered"
            )));
        }
        state.providers.insert(
            id,
            ProviderEntry {
                provider,
                rate_limit: 0,
                request_timestamps: Vec::new(),
            },
        );
        Ok(())
    }

    pub async fn unregister(&self, provider_id: &str) -> Result<(), ConsensusError> {
        let mut state = self.state.lock().await;
        if state.providers.remove(provider_id).is_none() {
            return Err(ConsensusError::Configuration(format!(
                "provider '{provider_id}' not registered"
            )));
        }
        Ok(())
    }

    pub async fn set_provider_rate_limit(&self, provider_id: &str, limit: u32) -> Result<(), ConsensusError> {
        let mut state = self.state.lock().await;
        let entry = state.providers.get_mut(provider_id).ok_or_else(|| {
            ConsensusError::Configuration(format!("provider '{provider_id}' not registered"))
        })?;
        entry.rate_limit = limit;
        Ok(())
    }

    /// `None` if no limit is configured for this provider, otherwise the
    /// number of additional calls allowed within the current 60s window.
    pub async fn get_provider_rate_limit_remaining(&self, provider_id: &str) -> Option<u32> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let entry = state.providers.get_mut(provider_id)?;
        if entry.rate_limit == 0 {
            return None;
        }
        let used = RegistryState::prune_and_count(entry, now) as u32;
        Some(entry.rate_limit.saturating_sub(used))
    }

    pub async fn list_all_models(&self) -> Vec<ModelInfo> {
        let state = self.state.lock().await;
        state
            .providers
            .values()
            .flat_map(|e| e.provider.list_models())
            .collect()
    }

    /// Resolve a `provider:model` reference to its static metadata.
    pub async fn get_model_info(&self, model_ref: &str) -> Result<ModelInfo, ConsensusError> {
        let (provider_id, model_id) = split_ref(model_ref)?;
        let state = self.state.lock().await;
        let entry = state.providers.get(provider_id).ok_or_else(|| {
            ConsensusError::Configuration(format!("provider '{provider_id}' not registered"))
        })?;
        entry
            .provider
            .list_models()
            .into_iter()
            .find(|m| m.model_id == model_id)
            .ok_or_else(|| {
                ConsensusError::Protocol(format!("model '{model_ref}' not found"))
            })
    }

    /// Resolve a `provider:model` reference to a live provider handle,
    /// checking and recording the per-provider rate budget on the way.
    pub async fn get_provider(
        &self,
        model_ref: &str,
    ) -> Result<(Arc<dyn Provider>, String), ConsensusError> {
        let (provider_id, model_id) = split_ref(model_ref)?;
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let entry = state.providers.get_mut(provider_id).ok_or_else(|| {
            ConsensusError::Configuration(format!("provider '{provider_id}' not registered"))
        })?;

        if entry.rate_limit > 0 {
            let used = RegistryState::prune_and_count(entry, now);
            if used as u32 >= entry.rate_limit {
                return Err(ConsensusError::ProviderQuotaExceeded {
                    provider_id: provider_id.to_string(),
                    rate_limit: entry.rate_limit,
                });
            }
        }
        entry.request_timestamps.push(now);

        Ok((entry.provider.clone(), model_id.to_string()))
    }

    /// Record usage against the cumulative cost ceiling. Returns the
    /// incremental cost of this call.
    pub async fn record_usage(&self, model_info: &ModelInfo, usage: Usage) -> Result<f64, ConsensusError> {
        let incremental = model_info.cost(usage);
        let mut state = self.state.lock().await;
        let attempted = state.cumulative_cost + incremental;
        if self.cost_hard_limit > 0.0 && attempted > self.cost_hard_limit {
            return Err(ConsensusError::CostLimitExceeded {
                attempted,
                limit: self.cost_hard_limit,
            });
        }
        state.cumulative_cost = attempted;
        Ok(incremental)
    }

    pub async fn cumulative_cost(&self) -> f64 {
        self.state.lock().await.cumulative_cost
    }

    pub async fn reset_cost(&self) {
        self.state.lock().await.cumulative_cost = 0.0;
    }

    /// Every currently eligible model (proposer_eligible, optionally
    /// restricted to a panel of model refs).
    pub async fn eligible_models(&self, panel: Option<&[String]>) -> Vec<ModelInfo> {
        let all = self.list_all_models().await;
        all.into_iter()
            .filter(|m| match panel {
                Some(refs) => refs.contains(&m.model_ref()),
                None => true,
            })
            .collect()
    }
}

fn split_ref(model_ref: &str) -> Result<(&str, &str), ConsensusError> {
    model_ref
        .split_once(':')
        .ok_or_else(|| ConsensusError::Protocol(format!("malformed model reference '{model_ref}'")))
}
