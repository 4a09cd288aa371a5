//! Share-Offer Negotiator.
//!
//! Turns a reconciler result that found a gap into a consent-gated offer to
//! the subject. Nothing reaches the guesser unless the subject accepts, and
//! declining never blocks the guesser.

use chrono::{DateTime, Utc};
use parley_core::config::ShareOfferConfig;
use parley_core::consent::{ConsentDecision, ConsentRecord, ConsentRepository, ConsentTarget};
use parley_core::empathy::{Direction, EmpathyAttempt, EmpathyAttemptRepository, EmpathyStatus};
use parley_core::reconciler::ReconcilerResult;
use parley_core::share::{
    DeliveryStatus, ShareOffer, ShareOfferRepository, ShareOfferStatus, ShareResponse,
};
use parley_core::{ParleyError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The subject's answer to an offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ShareOfferReply {
    /// Share `content`, or the suggested draft when `None`.
    Accept { content: Option<String> },
    /// Replace the suggested draft; the offer stays open.
    Refine { content: String },
    Decline,
    /// Same gating effect as `Decline`, recorded separately.
    Skip,
}

/// Outcome of a reply, including the guesser's attempt when it moved.
#[derive(Debug, Clone)]
pub struct ReplyOutcome {
    pub offer: ShareOffer,
    pub attempt: Option<EmpathyAttempt>,
}

/// Shared context as the guesser sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedContextView {
    pub offer_id: String,
    pub subject_id: String,
    pub content: String,
    pub delivery_status: DeliveryStatus,
    pub shared_at: Option<DateTime<Utc>>,
}

pub struct ShareOfferNegotiator {
    offers: Arc<dyn ShareOfferRepository>,
    attempts: Arc<dyn EmpathyAttemptRepository>,
    consents: Arc<dyn ConsentRepository>,
    config: ShareOfferConfig,
}

impl ShareOfferNegotiator {
    pub fn new(
        offers: Arc<dyn ShareOfferRepository>,
        attempts: Arc<dyn EmpathyAttemptRepository>,
        consents: Arc<dyn ConsentRepository>,
        config: ShareOfferConfig,
    ) -> Self {
        Self {
            offers,
            attempts,
            consents,
            config,
        }
    }

    /// Creates the offer for a result whose action is not `PROCEED`.
    pub async fn create_offer(&self, result: &ReconcilerResult) -> Result<ShareOffer> {
        let offer = ShareOffer::from_result(result)?;
        self.offers.create(&offer).await?;
        tracing::info!(
            target: "share_offer",
            session_id = %offer.session_id,
            offer_id = %offer.id,
            guesser_id = %offer.guesser_id,
            subject_id = %offer.subject_id,
            action = %offer.action,
            "share offer created"
        );
        Ok(offer)
    }

    /// The offer `result` calls for: the one already created for it if that
    /// is still open, otherwise a new one.
    pub async fn offer_for_result(&self, result: &ReconcilerResult) -> Result<ShareOffer> {
        let existing = self
            .offers
            .list_for_direction(&result.session_id, &result.guesser_id, &result.subject_id)
            .await?
            .into_iter()
            .find(|o| o.result_id == result.id && o.status.is_active());
        match existing {
            Some(offer) => Ok(offer),
            None => self.create_offer(result).await,
        }
    }

    /// Invalidates earlier offers of a direction before a new analysis.
    ///
    /// Unanswered offers expire; accepted context that has not been
    /// delivered yet is superseded. Returns the number of offers touched.
    pub async fn supersede_direction(&self, session_id: &str, direction: &Direction) -> Result<usize> {
        let offers = self
            .offers
            .list_for_direction(session_id, &direction.guesser_id, &direction.subject_id)
            .await?;

        let mut touched = 0;
        for mut offer in offers {
            let changed = if offer.status.is_active() {
                offer.expire()?;
                true
            } else {
                offer.advance_delivery(DeliveryStatus::Superseded)
            };
            if changed {
                self.offers.update(&offer).await?;
                touched += 1;
            }
        }

        if touched > 0 {
            tracing::info!(
                target: "share_offer",
                session_id,
                direction = %direction,
                touched,
                "earlier share offers superseded"
            );
        }
        Ok(touched)
    }

    /// The subject's active offer, if any, without marking it as shown.
    pub async fn peek_offer(&self, session_id: &str, subject_id: &str) -> Result<Option<ShareOffer>> {
        Ok(self
            .offers
            .list_for_subject(session_id, subject_id)
            .await?
            .into_iter()
            .rev()
            .find(|o| o.status.is_active()))
    }

    /// The subject's active offer; a `PENDING` offer becomes `OFFERED`.
    pub async fn get_offer(&self, session_id: &str, subject_id: &str) -> Result<Option<ShareOffer>> {
        let Some(mut offer) = self.peek_offer(session_id, subject_id).await? else {
            return Ok(None);
        };
        if offer.status == ShareOfferStatus::Pending {
            offer.mark_offered();
            offer = self.offers.update(&offer).await?;
        }
        Ok(Some(offer))
    }

    /// Loads an offer addressed to `subject_id`. Offers of other users are
    /// reported as missing.
    pub async fn find_for_subject(&self, offer_id: &str, subject_id: &str) -> Result<ShareOffer> {
        self.offers
            .find_by_id(offer_id)
            .await?
            .filter(|o| o.subject_id == subject_id)
            .ok_or_else(|| ParleyError::not_found("ShareOffer", offer_id))
    }

    pub async fn respond(
        &self,
        offer_id: &str,
        subject_id: &str,
        reply: ShareOfferReply,
    ) -> Result<ReplyOutcome> {
        let mut offer = self.find_for_subject(offer_id, subject_id).await?;

        match reply {
            ShareOfferReply::Accept { content } => {
                let content = content.unwrap_or_else(|| offer.suggested_content.clone());
                let content = self.validate_content(&content)?;
                offer.accept(content)?;
                let offer = self.offers.update(&offer).await?;
                self.record_consent(&offer, ConsentDecision::Granted).await?;
                let attempt = self.move_guesser(&offer, EmpathyStatus::Refining).await?;
                tracing::info!(
                    target: "share_offer",
                    session_id = %offer.session_id,
                    offer_id = %offer.id,
                    "share offer accepted"
                );
                Ok(ReplyOutcome { offer, attempt })
            }
            ShareOfferReply::Refine { content } => {
                let content = self.validate_content(&content)?;
                offer.refine(content)?;
                let offer = self.offers.update(&offer).await?;
                Ok(ReplyOutcome {
                    offer,
                    attempt: None,
                })
            }
            ShareOfferReply::Decline => self.decline(offer, ShareResponse::Declined).await,
            ShareOfferReply::Skip => self.decline(offer, ShareResponse::Skipped).await,
        }
    }

    async fn decline(&self, mut offer: ShareOffer, response: ShareResponse) -> Result<ReplyOutcome> {
        offer.decline(response)?;
        let offer = self.offers.update(&offer).await?;
        self.record_consent(&offer, ConsentDecision::Denied).await?;
        let attempt = self.move_guesser(&offer, EmpathyStatus::Ready).await?;
        tracing::info!(
            target: "share_offer",
            session_id = %offer.session_id,
            offer_id = %offer.id,
            response = %response,
            "share offer declined"
        );
        Ok(ReplyOutcome { offer, attempt })
    }

    /// Accepted context addressed to the guesser. Reading it marks pending
    /// deliveries as delivered.
    pub async fn shared_context_for(
        &self,
        session_id: &str,
        direction: &Direction,
    ) -> Result<Vec<SharedContextView>> {
        let offers = self
            .offers
            .list_for_direction(session_id, &direction.guesser_id, &direction.subject_id)
            .await?;

        let mut views = Vec::new();
        for mut offer in offers {
            if offer.status != ShareOfferStatus::Accepted
                || offer.delivery_status == Some(DeliveryStatus::Superseded)
            {
                continue;
            }
            if offer.advance_delivery(DeliveryStatus::Delivered) {
                offer = self.offers.update(&offer).await?;
            }
            if let Some(view) = shared_view(&offer) {
                views.push(view);
            }
        }
        Ok(views)
    }

    /// Marks one piece of shared context as seen. Moving backwards is a no-op.
    pub async fn mark_seen(
        &self,
        session_id: &str,
        guesser_id: &str,
        offer_id: &str,
    ) -> Result<ShareOffer> {
        let mut offer = self
            .offers
            .find_by_id(offer_id)
            .await?
            .filter(|o| {
                o.session_id == session_id
                    && o.guesser_id == guesser_id
                    && o.status == ShareOfferStatus::Accepted
            })
            .ok_or_else(|| ParleyError::not_found("SharedContext", offer_id))?;

        if offer.delivery_status == Some(DeliveryStatus::Superseded) {
            return Err(ParleyError::conflict(
                "shared context was superseded",
                DeliveryStatus::Superseded,
            ));
        }
        if offer.advance_delivery(DeliveryStatus::Seen) {
            offer = self.offers.update(&offer).await?;
        }
        Ok(offer)
    }

    fn validate_content(&self, content: &str) -> Result<String> {
        let trimmed = content.trim();
        let chars = trimmed.chars().count();
        if trimmed.is_empty() || chars < self.config.min_content_chars {
            return Err(ParleyError::validation(format!(
                "shared content must have at least {} characters",
                self.config.min_content_chars
            )));
        }
        if chars > self.config.max_content_chars {
            return Err(ParleyError::validation(format!(
                "shared content exceeds {} characters",
                self.config.max_content_chars
            )));
        }
        Ok(trimmed.to_string())
    }

    async fn record_consent(&self, offer: &ShareOffer, decision: ConsentDecision) -> Result<()> {
        self.consents
            .append(&ConsentRecord::new(
                &offer.session_id,
                &offer.subject_id,
                ConsentTarget::ShareOffer,
                &offer.id,
                decision,
            ))
            .await
    }

    /// Moves the guesser's attempt out of `AWAITING_SHARING`. Attempts in any
    /// other state are left alone.
    async fn move_guesser(
        &self,
        offer: &ShareOffer,
        to: EmpathyStatus,
    ) -> Result<Option<EmpathyAttempt>> {
        let Some(mut attempt) = self
            .attempts
            .find_by_guesser(&offer.session_id, &offer.guesser_id)
            .await?
        else {
            return Ok(None);
        };
        if attempt.status != EmpathyStatus::AwaitingSharing {
            return Ok(None);
        }
        attempt.transition(to)?;
        Ok(Some(self.attempts.update(&attempt).await?))
    }
}

fn shared_view(offer: &ShareOffer) -> Option<SharedContextView> {
    Some(SharedContextView {
        offer_id: offer.id.clone(),
        subject_id: offer.subject_id.clone(),
        content: offer.shared_content.clone()?,
        delivery_status: offer.delivery_status?,
        shared_at: offer.responded_at,
    })
}
