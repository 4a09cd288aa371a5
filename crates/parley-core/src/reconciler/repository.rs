//! Reconciler result repository trait.

use super::model::ReconcilerResult;
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait ReconcilerResultRepository: Send + Sync {
    async fn find_by_id(&self, result_id: &str) -> Result<Option<ReconcilerResult>>;

    /// Most recent result for one direction of a session.
    async fn find_latest(
        &self,
        session_id: &str,
        guesser_id: &str,
        subject_id: &str,
    ) -> Result<Option<ReconcilerResult>>;

    /// Every result for one direction, oldest first.
    async fn list_for_direction(
        &self,
        session_id: &str,
        guesser_id: &str,
        subject_id: &str,
    ) -> Result<Vec<ReconcilerResult>>;

    /// Results are immutable; saving an existing id is a `Conflict`.
    async fn create(&self, result: &ReconcilerResult) -> Result<()>;
}
