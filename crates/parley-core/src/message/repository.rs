//! Message repository trait.

use super::model::Message;
use crate::error::Result;
use crate::stage::Stage;
use async_trait::async_trait;

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn append(&self, message: &Message) -> Result<()>;

    /// One user's messages in one stage, oldest first.
    async fn list_for_stage(&self, session_id: &str, user_id: &str, stage: Stage)
    -> Result<Vec<Message>>;
}
