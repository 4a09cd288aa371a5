//! Consent audit records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsentDecision {
    Granted,
    Denied,
}

/// What a consent decision is about.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConsentTarget {
    /// Revealing the user's empathy statement to the partner.
    EmpathyAttempt,
    /// Sharing corrective context through a share offer.
    ShareOffer,
}

/// Immutable consent decision. A revocation is a new record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentRecord {
    pub id: String,
    pub session_id: String,
    pub user_id: String,
    pub target: ConsentTarget,
    /// Id of the attempt or offer the decision binds to.
    pub target_id: String,
    pub decision: ConsentDecision,
    pub recorded_at: DateTime<Utc>,
}

impl ConsentRecord {
    pub fn new(
        session_id: &str,
        user_id: &str,
        target: ConsentTarget,
        target_id: &str,
        decision: ConsentDecision,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            target,
            target_id: target_id.to_string(),
            decision,
            recorded_at: Utc::now(),
        }
    }
}
