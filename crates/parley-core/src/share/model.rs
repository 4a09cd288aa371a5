//! Share offer domain model.

use crate::error::{ParleyError, Result};
use crate::reconciler::{ReconcilerResult, ShareAction};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ShareOfferStatus {
    /// Created by the reconciler, not yet fetched by the subject.
    Pending,
    /// Shown to the subject.
    Offered,
    Accepted,
    Declined,
    /// Superseded by a newer analysis before the subject answered.
    Expired,
}

impl ShareOfferStatus {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Offered)
    }
}

/// How the subject answered. `Skipped` gates exactly like `Declined` but is
/// kept apart for reporting.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ShareResponse {
    Accepted,
    Declined,
    Skipped,
}

/// Delivery of accepted shared context to the guesser. Moves forward only.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Seen,
    /// The guesser re-submitted before the context was delivered.
    Superseded,
}

impl DeliveryStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Delivered => 1,
            Self::Seen => 2,
            Self::Superseded => 3,
        }
    }

    /// Whether moving from `self` to `to` is a forward step.
    pub fn can_advance_to(self, to: DeliveryStatus) -> bool {
        match (self, to) {
            (Self::Superseded, _) => false,
            (Self::Pending, Self::Superseded) => true,
            (_, Self::Superseded) => false,
            _ => to.rank() > self.rank(),
        }
    }
}

/// A consent-gated offer to the subject to share context with the guesser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareOffer {
    pub id: String,
    pub session_id: String,
    pub result_id: String,
    pub guesser_id: String,
    pub subject_id: String,
    pub action: ShareAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_share_focus: Option<String>,
    pub suggested_content: String,
    pub status: ShareOfferStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ShareResponse>,
    /// What the subject actually agreed to share.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_content: Option<String>,
    /// `None` until the offer is accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_status: Option<DeliveryStatus>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seen_at: Option<DateTime<Utc>>,
}

impl ShareOffer {
    /// Builds an offer from a result whose action is not `PROCEED`.
    pub fn from_result(result: &ReconcilerResult) -> Result<Self> {
        if result.recommendation.action == ShareAction::Proceed {
            return Err(ParleyError::internal(
                "a PROCEED result does not produce a share offer",
            ));
        }

        let focus = result.recommendation.suggested_share_focus.clone();
        let suggested_content = result
            .recommendation
            .suggested_content
            .clone()
            .unwrap_or_else(|| default_suggestion(focus.as_deref()));

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            session_id: result.session_id.clone(),
            result_id: result.id.clone(),
            guesser_id: result.guesser_id.clone(),
            subject_id: result.subject_id.clone(),
            action: result.recommendation.action,
            suggested_share_focus: focus,
            suggested_content,
            status: ShareOfferStatus::Pending,
            response: None,
            shared_content: None,
            delivery_status: None,
            version: 0,
            created_at: now,
            updated_at: now,
            responded_at: None,
            delivered_at: None,
            seen_at: None,
        })
    }

    fn ensure_active(&self) -> Result<()> {
        if !self.status.is_active() {
            return Err(ParleyError::conflict(
                "share offer has already been answered",
                self.status,
            ));
        }
        Ok(())
    }

    pub fn mark_offered(&mut self) {
        if self.status == ShareOfferStatus::Pending {
            self.status = ShareOfferStatus::Offered;
            self.updated_at = Utc::now();
        }
    }

    pub fn accept(&mut self, content: String) -> Result<()> {
        self.ensure_active()?;
        let now = Utc::now();
        self.status = ShareOfferStatus::Accepted;
        self.response = Some(ShareResponse::Accepted);
        self.shared_content = Some(content);
        self.delivery_status = Some(DeliveryStatus::Pending);
        self.responded_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Replaces the suggested draft with the subject's edit. The offer stays
    /// open until accepted or declined.
    pub fn refine(&mut self, content: String) -> Result<()> {
        self.ensure_active()?;
        self.suggested_content = content;
        self.status = ShareOfferStatus::Offered;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn decline(&mut self, response: ShareResponse) -> Result<()> {
        self.ensure_active()?;
        if response == ShareResponse::Accepted {
            return Err(ParleyError::internal("decline called with an accept response"));
        }
        let now = Utc::now();
        self.status = ShareOfferStatus::Declined;
        self.response = Some(response);
        self.responded_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn expire(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.status = ShareOfferStatus::Expired;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Moves delivery forward. Returns `false` (and changes nothing) for a
    /// backward or sideways move.
    pub fn advance_delivery(&mut self, to: DeliveryStatus) -> bool {
        let Some(current) = self.delivery_status else {
            return false;
        };
        if !current.can_advance_to(to) {
            return false;
        }

        let now = Utc::now();
        if matches!(to, DeliveryStatus::Delivered | DeliveryStatus::Seen) && self.delivered_at.is_none() {
            self.delivered_at = Some(now);
        }
        if to == DeliveryStatus::Seen {
            self.seen_at = Some(now);
        }
        self.delivery_status = Some(to);
        self.updated_at = now;
        true
    }
}

fn default_suggestion(focus: Option<&str>) -> String {
    match focus {
        Some(focus) => format!("Something that matters to me here is {focus}."),
        None => "There is something about how I feel that I'd like you to know.".to_string(),
    }
}
