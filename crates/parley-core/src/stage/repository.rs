//! Stage progress repository trait.

use super::model::{Stage, StageProgress};
use crate::error::Result;
use async_trait::async_trait;

/// Persistence for [`StageProgress`] rows, keyed by (session, user, stage).
///
/// # Implementation Notes
///
/// - `create` must fail with `Conflict` if the tuple already exists.
/// - `update` treats `progress.version` as the expected stored version and
///   fails with `Conflict` on mismatch; on success it returns the stored row
///   with the version bumped.
#[async_trait]
pub trait StageProgressRepository: Send + Sync {
    async fn find(&self, session_id: &str, user_id: &str, stage: Stage)
    -> Result<Option<StageProgress>>;

    /// The row for the highest stage the user has entered.
    async fn find_latest(&self, session_id: &str, user_id: &str) -> Result<Option<StageProgress>>;

    /// All rows of one user, ordered by stage.
    async fn list_for_user(&self, session_id: &str, user_id: &str) -> Result<Vec<StageProgress>>;

    async fn create(&self, progress: &StageProgress) -> Result<()>;

    async fn update(&self, progress: &StageProgress) -> Result<StageProgress>;
}
