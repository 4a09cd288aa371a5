//! Consent record repository trait.

use super::model::ConsentRecord;
use crate::error::Result;
use async_trait::async_trait;

/// Append-only store of consent decisions. There is no update or delete.
#[async_trait]
pub trait ConsentRepository: Send + Sync {
    async fn append(&self, record: &ConsentRecord) -> Result<()>;

    /// A user's records in one session, oldest first.
    async fn list_for_user(&self, session_id: &str, user_id: &str) -> Result<Vec<ConsentRecord>>;
}
