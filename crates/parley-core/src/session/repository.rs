//! Session repository trait.

use super::model::Session;
use crate::error::Result;
use async_trait::async_trait;

/// An abstract repository for session persistence.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Finds a session by its ID.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(Session))`: Session found
    /// - `Ok(None)`: Session not found
    /// - `Err(_)`: Error occurred during retrieval
    async fn find_by_id(&self, session_id: &str) -> Result<Option<Session>>;

    /// Stores a new session. Fails with `Conflict` if the id is taken.
    async fn create(&self, session: &Session) -> Result<()>;

    /// Replaces a stored session if its `version` still matches, returning
    /// the stored copy with the version bumped. A stale version is a
    /// `Conflict`.
    async fn update(&self, session: &Session) -> Result<Session>;

    /// Lists all sessions a user is a member of.
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Session>>;
}
