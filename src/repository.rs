//! Repository capability — the boundary between the consensus core and
//! wherever deliberations are actually persisted.
//!
//! The core never opens a connection, issues SQL, or touches a filesystem.
//! It calls this trait once, at the end of a deliberation, and expects the
//! whole batch of writes to succeed or fail as a unit.

use async_trait::async_trait;

use crate::context::DeliberationContext;
use crate::types::{SubtaskResult, VotingAggregation};

/// Everything the core needs to persist about one completed (or failed)
/// deliberation, bundled so an implementation can open a single transaction.
#[derive(Debug, Clone)]
pub struct DeliberationRecord<'a> {
    pub thread_id: String,
    pub question: &'a str,
    pub context: &'a DeliberationContext,
}

#[derive(Debug, Clone)]
pub struct VotingRecord<'a> {
    pub thread_id: String,
    pub question: &'a str,
    pub aggregation: &'a VotingAggregation,
}

#[derive(Debug, Clone)]
pub struct DecompositionRecord<'a> {
    pub thread_id: String,
    pub question: &'a str,
    pub subtask_results: &'a [SubtaskResult],
    pub synthesis: &'a str,
}

/// Consumed persistence capability. Implementations are responsible for
/// transactional semantics: if any write in a save* call fails, the whole
/// call must roll back rather than leave partial state visible.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn save_deliberation(&self, record: DeliberationRecord<'_>) -> Result<(), RepositoryError>;
    async fn save_voting(&self, record: VotingRecord<'_>) -> Result<(), RepositoryError>;
    async fn save_decomposition(&self, record: DecompositionRecord<'_>) -> Result<(), RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
#[error("storage error: {0}")]
pub struct RepositoryError(pub String);

/// In-memory repository for tests and for orchestrators that don't need
/// durability (e.g. one-shot CLI invocations piping stdout elsewhere).
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    deliberations: tokio::sync::Mutex<Vec<String>>,
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn save_deliberation(&self, record: DeliberationRecord<'_>) -> Result<(), RepositoryError> {
        self.deliberations.lock().await.push(record.thread_id);
        Ok(())
    }

    async fn save_voting(&self, _record: VotingRecord<'_>) -> Result<(), RepositoryError> {
        Ok(())
    }

    async fn save_decomposition(&self, _record: DecompositionRecord<'_>) -> Result<(), RepositoryError> {
        Ok(())
    }
}
