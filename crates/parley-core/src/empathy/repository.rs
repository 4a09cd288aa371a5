//! Empathy attempt repository trait.

use super::model::EmpathyAttempt;
use crate::error::Result;
use async_trait::async_trait;

/// Persistence for empathy attempts, one per (session, guesser).
///
/// `update` follows the same optimistic-version contract as
/// [`crate::stage::StageProgressRepository::update`]. The version check is
/// what makes the `ANALYZING` claim race-free.
#[async_trait]
pub trait EmpathyAttemptRepository: Send + Sync {
    async fn find_by_id(&self, attempt_id: &str) -> Result<Option<EmpathyAttempt>>;

    async fn find_by_guesser(&self, session_id: &str, guesser_id: &str)
    -> Result<Option<EmpathyAttempt>>;

    async fn list_for_session(&self, session_id: &str) -> Result<Vec<EmpathyAttempt>>;

    async fn create(&self, attempt: &EmpathyAttempt) -> Result<()>;

    async fn update(&self, attempt: &EmpathyAttempt) -> Result<EmpathyAttempt>;
}
