//! Transcript indexing hook.

use async_trait::async_trait;

use crate::message::Message;

/// Indexes a freshly recorded message (embedding, summary refresh, ...).
///
/// Always invoked as a detached job; a failure is logged and otherwise
/// ignored.
#[async_trait]
pub trait TranscriptIndexer: Send + Sync {
    async fn index(&self, message: &Message) -> Result<(), String>;
}

/// An indexer that does nothing.
pub struct NoOpTranscriptIndexer;

#[async_trait]
impl TranscriptIndexer for NoOpTranscriptIndexer {
    async fn index(&self, _message: &Message) -> Result<(), String> {
        Ok(())
    }
}
