//! Share offer repository trait.

use super::model::ShareOffer;
use crate::error::Result;
use async_trait::async_trait;

/// Persistence for share offers. `update` is optimistically versioned.
#[async_trait]
pub trait ShareOfferRepository: Send + Sync {
    async fn find_by_id(&self, offer_id: &str) -> Result<Option<ShareOffer>>;

    /// Offers of one direction, oldest first.
    async fn list_for_direction(
        &self,
        session_id: &str,
        guesser_id: &str,
        subject_id: &str,
    ) -> Result<Vec<ShareOffer>>;

    /// Offers addressed to a subject across both directions, oldest first.
    async fn list_for_subject(&self, session_id: &str, subject_id: &str) -> Result<Vec<ShareOffer>>;

    async fn create(&self, offer: &ShareOffer) -> Result<()>;

    async fn update(&self, offer: &ShareOffer) -> Result<ShareOffer>;
}
