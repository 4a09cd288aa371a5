//! Per-user read models.
//!
//! Every view is scoped to the requesting user: their own rows in full, the
//! partner's only as stage/status facts, and the partner's empathy statement
//! only once it has been revealed.

use chrono::{DateTime, Utc};
use parley_core::empathy::{EmpathyAttempt, EmpathyStatus, EmpathyValidation};
use parley_core::error::StageBlocked;
use parley_core::session::SessionStatus;
use parley_core::stage::{GateEvaluation, PartnerStage, Stage, StageProgress};
use serde::{Deserialize, Serialize};

/// A user's gate state. Never carries the partner's gate map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateStateView {
    pub session_id: String,
    pub user_id: String,
    pub session_status: SessionStatus,
    /// `None` before the user's first action.
    pub current: Option<StageProgress>,
    pub evaluation: Option<GateEvaluation>,
    /// Rows of earlier stages, oldest first.
    pub history: Vec<StageProgress>,
    pub partner: Option<PartnerStage>,
    /// Why the user cannot leave the current stage, when they cannot.
    pub blocked: Option<StageBlocked>,
}

/// The user's own attempt, in full.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnAttemptView {
    pub attempt_id: String,
    pub content: String,
    pub status: EmpathyStatus,
    pub revision_count: u32,
    pub revealed_at: Option<DateTime<Utc>>,
    pub validation: Option<EmpathyValidation>,
}

impl From<&EmpathyAttempt> for OwnAttemptView {
    fn from(attempt: &EmpathyAttempt) -> Self {
        Self {
            attempt_id: attempt.id.clone(),
            content: attempt.content.clone(),
            status: attempt.status,
            revision_count: attempt.revision_count,
            revealed_at: attempt.revealed_at,
            validation: attempt.validation.clone(),
        }
    }
}

/// The partner's attempt about the user. `content` is present only while
/// the statement is revealed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerAttemptView {
    pub status: EmpathyStatus,
    pub revision_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub revealed_at: Option<DateTime<Utc>>,
}

impl From<&EmpathyAttempt> for PartnerAttemptView {
    fn from(attempt: &EmpathyAttempt) -> Self {
        let visible = attempt.status.is_visible_to_subject();
        Self {
            status: attempt.status,
            revision_count: attempt.revision_count,
            content: visible.then(|| attempt.content.clone()),
            revealed_at: attempt.revealed_at.filter(|_| visible),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmpathyExchangeView {
    pub session_id: String,
    pub user_id: String,
    pub stage: Option<Stage>,
    pub own: Option<OwnAttemptView>,
    pub partner: Option<PartnerAttemptView>,
    /// The user has a share offer waiting for an answer.
    pub share_offer_pending: bool,
    /// Shared context addressed to the user that has not been seen yet.
    pub unseen_shared_context: usize,
}
