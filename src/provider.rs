//! Provider capability — the boundary between the consensus core and
//! whatever actually talks to a language model.
//!
//! The core never knows about HTTP, SDKs, or vendor wire formats. It knows
//! only this trait. Production binaries wire in concrete adapters; tests use
//! [`MockProvider`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::context::ToolCallRecord;
use crate::error::{ConsensusError, ProviderError};

/// Role of a single message in a provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn in a provider call's message list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Requested response shape. `Json` asks the provider to emit structured
/// JSON; the core still parses defensively since providers can misbehave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    Text,
    Json,
}

/// A single tool invocation a model asked to make.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments_json: String,
}

/// Why the provider stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    MaxTokens,
    ToolCalls,
    ContentFilter,
}

/// Token accounting for a single call, used to drive cost tracking.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Static metadata about a model served by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub provider_id: String,
    pub model_id: String,
    pub input_cost_per_mtok: f64,
    pub output_cost_per_mtok: f64,
    /// False for models whose output shape can't serve as a proposer (e.g.
    /// search-grounded models that always cite sources inline).
    pub proposer_eligible: bool,
}

impl ModelInfo {
    /// Provider-qualified identifier, e.g. `"anthropic:claude-opus"`.
    pub fn model_ref(&self) -> String {
        format!("{}:{}", self.provider_id, self.model_id)
    }

    pub fn cost(&self, usage: Usage) -> f64 {
        (usage.input_tokens as f64 * self.input_cost_per_mtok
            + usage.output_tokens as f64 * self.output_cost_per_mtok)
            / 1_000_000.0
    }
}

/// A completed call to a model.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub content: String,
    pub model_info: ModelInfo,
    pub usage: Usage,
    pub finish_reason: FinishReason,
    pub tool_calls: Vec<ToolCall>,
    pub latency_ms: u64,
}

/// A language-model backend. Implementations are expected to be cheaply
/// cloneable handles (e.g. wrapping an `Arc<Client>`) since the registry
/// hands out shared references across concurrent deliberations.
#[async_trait]
pub trait Provider: Send + Sync + std::fmt::Debug {
    fn provider_id(&self) -> &str;

    fn list_models(&self) -> Vec<ModelInfo>;

    async fn send(
        &self,
        model_id: &str,
        messages: &[Message],
        max_tokens: u32,
        temperature: f32,
        response_format: ResponseFormat,
    ) -> Result<ModelResponse, ProviderError>;

    async fn health_check(&self) -> bool {
        true
    }
}

/// Capability for executing tool calls a model emits mid-conversation.
///
/// The core never knows what a tool actually does; it only forwards the
/// [`ToolCall`]s a provider response carries and appends whatever comes back
/// to the deliberation's tool call log.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    async fn execute_tool(&self, call: &ToolCall) -> Result<String, ProviderError>;
}

const MAX_RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_BACKOFF: Duration = Duration::from_millis(200);

/// Call a provider with bounded exponential backoff on retryable failures,
/// racing every attempt -- including the backoff sleep between attempts --
/// against `cancellation` so a cancelled deliberation never waits out a
/// queued retry or an in-flight call.
///
/// This is the single place every phase handler and protocol routine goes
/// through to reach a provider; nothing calls `Provider::send` directly.
pub async fn send_with_retry(
    provider: &Arc<dyn Provider>,
    model_id: &str,
    messages: &[Message],
    max_tokens: u32,
    temperature: f32,
    response_format: ResponseFormat,
    cancellation: &CancellationToken,
) -> Result<ModelResponse, ConsensusError> {
    let mut attempt = 0u32;
    loop {
        let outcome = tokio::select! {
            res = provider.send(model_id, messages, max_tokens, temperature, response_format) => res,
            _ = cancellation.cancelled() => return Err(ConsensusError::Cancelled),
        };

        match outcome {
            Ok(response) => return Ok(response),
            Err(e) if e.is_retryable() && attempt < MAX_RETRY_ATTEMPTS => {
                let backoff = RETRY_BASE_BACKOFF * 2u32.pow(attempt);
                attempt += 1;
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancellation.cancelled() => return Err(ConsensusError::Cancelled),
                }
            }
            Err(e) => return Err(ConsensusError::Provider(e)),
        }
    }
}

/// Maximum number of tool round-trips before giving up and returning whatever
/// the model last said, tool calls and all -- a model that never stops
/// calling tools shouldn't hang a deliberation forever.
const MAX_TOOL_ITERATIONS: u32 = 8;

/// Loop send -> execute-tool -> send until the model returns a response that
/// isn't a tool call, forwarding every call and result into `tool_calls_log`.
///
/// Each send in the loop goes through [`send_with_retry`], so cancellation
/// and backoff apply to every round-trip, not just the first.
#[allow(clippy::too_many_arguments)]
pub async fn tool_augmented_send(
    provider: &Arc<dyn Provider>,
    model_id: &str,
    mut messages: Vec<Message>,
    max_tokens: u32,
    temperature: f32,
    response_format: ResponseFormat,
    cancellation: &CancellationToken,
    tool_registry: &dyn ToolRegistry,
    tool_calls_log: &mut Vec<ToolCallRecord>,
) -> Result<ModelResponse, ConsensusError> {
    let mut iterations = 0u32;
    loop {
        let response = send_with_retry(
            provider,
            model_id,
            &messages,
            max_tokens,
            temperature,
            response_format,
            cancellation,
        )
        .await?;

        if response.finish_reason != FinishReason::ToolCalls || response.tool_calls.is_empty() {
            return Ok(response);
        }
        iterations += 1;
        if iterations > MAX_TOOL_ITERATIONS {
            return Ok(response);
        }

        messages.push(Message::assistant(response.content.clone()));
        for call in &response.tool_calls {
            let result = match tool_registry.execute_tool(call).await {
                Ok(result) => result,
                Err(e) => format!("tool error: {e}"),
            };
            tool_calls_log.push(ToolCallRecord {
                call: call.clone(),
                result: result.clone(),
                at: chrono::Utc::now(),
            });
            messages.push(Message::user(format!("Tool \"{}\" result:\n{result}", call.name)));
        }
    }
}

/// Strip Markdown code fences and parse the remaining text as JSON.
///
/// Providers asked for `ResponseFormat::Json` sometimes wrap their answer in
/// a ```json fenced block anyway; this is the single place that defends
/// against it so every caller gets the same leniency.
pub fn extract_json(raw: &str) -> Result<serde_json::Value, crate::error::ConsensusError> {
    let trimmed = raw.trim();
    let unfenced = if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        rest.trim_start_matches('\n')
            .rsplit_once("```")
            .map(|(body, _)| body)
            .unwrap_or(rest)
    } else {
        trimmed
    };
    serde_json::from_str(unfenced.trim())
        .map_err(|e| crate::error::ConsensusError::JsonExtraction(e.to_string()))
}

/// Test/demo provider returning canned responses keyed by model id.
///
/// Every call is logged for assertions, and responses are looked up by
/// model id with a fallback default so tests can register only the models
/// they care about.
#[derive(Debug, Default)]
pub struct MockProvider {
    id: String,
    models: Vec<ModelInfo>,
    responses: std::collections::HashMap<String, String>,
    default_response: String,
    call_log: std::sync::Mutex<Vec<(String, String)>>,
}

impl MockProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            default_response: "mock response".to_string(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, info: ModelInfo) -> Self {
        self.models.push(info);
        self
    }

    pub fn with_response(mut self, model_id: impl Into<String>, text: impl Into<String>) -> Self {
        self.responses.insert(model_id.into(), text.into());
        self
    }

    /// Calls made so far as `(model_id, last_user_message)` pairs.
    pub fn call_log(&self) -> Vec<(String, String)> {
        self.call_log.lock().expect("mock provider lock poisoned").clone()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }

    fn list_models(&self) -> Vec<ModelInfo> {
        self.models.clone()
    }

    async fn send(
        &self,
        model_id: &str,
        messages: &[Message],
        _max_tokens: u32,
        _temperature: f32,
        _response_format: ResponseFormat,
    ) -> Result<ModelResponse, ProviderError> {
        let model_info = self
            .models
            .iter()
            .find(|m| m.model_id == model_id)
            .cloned()
            .ok_or_else(|| ProviderError::ModelNotFound {
                provider_id: self.id.clone(),
                model_id: model_id.to_string(),
            })?;

        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.call_log
            .lock()
            .expect("mock provider lock poisoned")
            .push((model_id.to_string(), last_user));

        let content = self
            .responses
            .get(model_id)
            .cloned()
            .unwrap_or_else(|| self.default_response.clone());

        Ok(ModelResponse {
            content,
            model_info,
            usage: Usage {
                input_tokens: 100,
                output_tokens: 50,
            },
            finish_reason: FinishReason::Stop,
            tool_calls: Vec::new(),
            latency_ms: 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(model_id: &str) -> ModelInfo {
        ModelInfo {
            provider_id: "mock".to_string(),
            model_id: model_id.to_string(),
            input_cost_per_mtok: 1.0,
            output_cost_per_mtok: 2.0,
            proposer_eligible: true,
        }
    }

    #[test]
    fn model_ref_is_provider_qualified() {
        assert_eq!(info("opus").model_ref(), "mock:opus");
    }

    #[test]
    fn cost_formula_matches_spec() {
        let usage = Usage {
            input_tokens: 1_000_000,
            output_tokens: 500_000,
        };
        assert_eq!(info("opus").cost(usage), 2.0);
    }

    #[test]
    fn extract_json_handles_fenced_blocks() {
        let raw = "```json\n{\"a\": 1}\n```";
        let value = extract_json(raw).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn extract_json_handles_bare_json() {
        let value = extract_json("{\"a\": 2}").unwrap();
        assert_eq!(value["a"], 2);
    }

    #[test]
    fn extract_json_fails_on_garbage() {
        assert!(extract_json("not json at all").is_err());
    }

    #[tokio::test]
    async fn mock_provider_logs_calls_and_returns_canned_response() {
        let provider = MockProvider::new("mock")
            .with_model(info("opus"))
            .with_response("opus", "canned answer");

        let resp = provider
            .send(
                "opus",
                &[Message::user("hello")],
                100,
                0.7,
                ResponseFormat::Text,
            )
            .await
            .unwrap();

        assert_eq!(resp.content, "canned answer");
        assert_eq!(provider.call_log(), vec![("opus".to_string(), "hello".to_string())]);
    }

    #[tokio::test]
    async fn mock_provider_errors_on_unknown_model() {
        let provider = MockProvider::new("mock");
        let err = provider
            .send("ghost", &[], 10, 0.0, ResponseFormat::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::ModelNotFound { .. }));
    }

    #[derive(Debug)]
    struct FlakyProvider {
        failures_remaining: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl Provider for FlakyProvider {
        fn provider_id(&self) -> &str {
            "flaky"
        }

        fn list_models(&self) -> Vec<ModelInfo> {
            vec![info("m")]
        }

        async fn send(
            &self,
            _model_id: &str,
            _messages: &[Message],
            _max_tokens: u32,
            _temperature: f32,
            _response_format: ResponseFormat,
        ) -> Result<ModelResponse, ProviderError> {
            if self.failures_remaining.load(std::sync::atomic::Ordering::SeqCst) > 0 {
                self.failures_remaining.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                return Err(ProviderError::Overloaded("flaky".to_string()));
            }
            Ok(ModelResponse {
                content: "recovered".to_string(),
                model_info: info("m"),
                usage: Usage::default(),
                finish_reason: FinishReason::Stop,
                tool_calls: Vec::new(),
                latency_ms: 1,
            })
        }
    }

    #[derive(Debug)]
    struct AlwaysOverloadedProvider;

    #[async_trait]
    impl Provider for AlwaysOverloadedProvider {
        fn provider_id(&self) -> &str {
            "flaky"
        }

        fn list_models(&self) -> Vec<ModelInfo> {
            vec![info("m")]
        }

        async fn send(
            &self,
            _model_id: &str,
            _messages: &[Message],
            _max_tokens: u32,
            _temperature: f32,
            _response_format: ResponseFormat,
        ) -> Result<ModelResponse, ProviderError> {
            Err(ProviderError::Overloaded("flaky".to_string()))
        }
    }

    #[derive(Debug)]
    struct HangingProvider;

    #[async_trait]
    impl Provider for HangingProvider {
        fn provider_id(&self) -> &str {
            "hanging"
        }

        fn list_models(&self) -> Vec<ModelInfo> {
            vec![info("m")]
        }

        async fn send(
            &self,
            _model_id: &str,
            _messages: &[Message],
            _max_tokens: u32,
            _temperature: f32,
            _response_format: ResponseFormat,
        ) -> Result<ModelResponse, ProviderError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            unreachable!("cancellation should have won the race")
        }
    }

    #[derive(Debug)]
    struct ToolCallingProvider {
        called_tool: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl Provider for ToolCallingProvider {
        fn provider_id(&self) -> &str {
            "tools"
        }

        fn list_models(&self) -> Vec<ModelInfo> {
            vec![info("m")]
        }

        async fn send(
            &self,
            _model_id: &str,
            _messages: &[Message],
            _max_tokens: u32,
            _temperature: f32,
            _response_format: ResponseFormat,
        ) -> Result<ModelResponse, ProviderError> {
            if !self.called_tool.swap(true, std::sync::atomic::Ordering::SeqCst) {
                return Ok(ModelResponse {
                    content: "let me check".to_string(),
                    model_info: info("m"),
                    usage: Usage::default(),
                    finish_reason: FinishReason::ToolCalls,
                    tool_calls: vec![ToolCall {
                        id: "1".to_string(),
                        name: "lookup".to_string(),
                        arguments_json: "{}".to_string(),
                    }],
                    latency_ms: 1,
                });
            }
            Ok(ModelResponse {
                content: "final answer".to_string(),
                model_info: info("m"),
                usage: Usage::default(),
                finish_reason: FinishReason::Stop,
                tool_calls: Vec::new(),
                latency_ms: 1,
            })
        }
    }

    struct EchoToolRegistry;

    #[async_trait]
    impl ToolRegistry for EchoToolRegistry {
        async fn execute_tool(&self, call: &ToolCall) -> Result<String, ProviderError> {
            Ok(format!("result for {}", call.name))
        }
    }

    #[tokio::test]
    async fn send_with_retry_recovers_from_retryable_failures() {
        let provider: Arc<dyn Provider> = Arc::new(FlakyProvider {
            failures_remaining: std::sync::atomic::AtomicU32::new(2),
        });
        let response = send_with_retry(
            &provider,
            "m",
            &[Message::user("hi")],
            10,
            0.0,
            ResponseFormat::Text,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(response.content, "recovered");
    }

    #[tokio::test]
    async fn send_with_retry_gives_up_after_max_attempts() {
        let provider: Arc<dyn Provider> = Arc::new(AlwaysOverloadedProvider);
        let err = send_with_retry(
            &provider,
            "m",
            &[Message::user("hi")],
            10,
            0.0,
            ResponseFormat::Text,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ConsensusError::Provider(ProviderError::Overloaded(_))));
    }

    #[tokio::test]
    async fn send_with_retry_races_cancellation_against_an_in_flight_call() {
        let provider: Arc<dyn Provider> = Arc::new(HangingProvider);
        let token = CancellationToken::new();
        token.cancel();

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            send_with_retry(&provider, "m", &[], 10, 0.0, ResponseFormat::Text, &token),
        )
        .await
        .expect("cancellation should short-circuit without waiting for the hanging call");

        assert!(matches!(result, Err(ConsensusError::Cancelled)));
    }

    #[tokio::test]
    async fn tool_augmented_send_loops_until_a_non_tool_response() {
        let provider: Arc<dyn Provider> = Arc::new(ToolCallingProvider {
            called_tool: std::sync::atomic::AtomicBool::new(false),
        });
        let registry = EchoToolRegistry;
        let mut log = Vec::new();

        let response = tool_augmented_send(
            &provider,
            "m",
            vec![Message::user("do the thing")],
            10,
            0.0,
            ResponseFormat::Text,
            &CancellationToken::new(),
            &registry,
            &mut log,
        )
        .await
        .unwrap();

        assert_eq!(response.content, "final answer");
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].call.name, "lookup");
        assert_eq!(log[0].result, "result for lookup");
    }
}
