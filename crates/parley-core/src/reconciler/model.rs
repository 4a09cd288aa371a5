//! Reconciler result model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    AsRefStr,
    Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum GapSeverity {
    None,
    Minor,
    Moderate,
    Significant,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ShareAction {
    Proceed,
    OfferOptional,
    OfferSharing,
}

impl ShareAction {
    /// Maps a gap severity onto the recommended next step.
    ///
    /// `significant` always offers sharing; `minor` and `moderate` offer it
    /// optionally when the judge thinks sharing would help; everything else
    /// proceeds.
    pub fn classify(severity: GapSeverity, sharing_would_help: bool) -> Self {
        match severity {
            GapSeverity::Significant => Self::OfferSharing,
            GapSeverity::Minor | GapSeverity::Moderate if sharing_would_help => {
                Self::OfferOptional
            }
            _ => Self::Proceed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alignment {
    /// 0..=100
    pub score: u8,
    #[serde(default)]
    pub summary: String,
}

impl Alignment {
    pub fn new(score: u32, summary: impl Into<String>) -> Self {
        Self {
            score: score.min(100) as u8,
            summary: summary.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gaps {
    pub severity: GapSeverity,
    #[serde(default)]
    pub missed_feelings: Vec<String>,
    #[serde(default)]
    pub summary: String,
}

impl Gaps {
    pub fn none() -> Self {
        Self {
            severity: GapSeverity::None,
            missed_feelings: Vec::new(),
            summary: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub action: ShareAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_share_focus: Option<String>,
    /// Draft the subject may share as-is or edit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_content: Option<String>,
}

/// Output of one reconciler run for one direction and one attempt revision.
///
/// Immutable once stored. The two fingerprints identify the exact inputs the
/// judgment was made on, so an unchanged re-run can reuse the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcilerResult {
    pub id: String,
    pub session_id: String,
    pub guesser_id: String,
    pub subject_id: String,
    pub attempt_id: String,
    pub attempt_revision: u32,
    pub guess_fingerprint: String,
    pub actual_fingerprint: String,
    pub alignment: Alignment,
    pub gaps: Gaps,
    pub recommendation: Recommendation,
    /// Set when the judgment capability failed and the safe default was used.
    #[serde(default)]
    pub degraded: bool,
    pub created_at: DateTime<Utc>,
}

/// Identity of the inputs a result was computed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerInputs {
    pub session_id: String,
    pub guesser_id: String,
    pub subject_id: String,
    pub attempt_id: String,
    pub attempt_revision: u32,
    pub guess_fingerprint: String,
    pub actual_fingerprint: String,
}

impl ReconcilerResult {
    pub fn new(
        inputs: &ReconcilerInputs,
        alignment: Alignment,
        gaps: Gaps,
        recommendation: Recommendation,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: inputs.session_id.clone(),
            guesser_id: inputs.guesser_id.clone(),
            subject_id: inputs.subject_id.clone(),
            attempt_id: inputs.attempt_id.clone(),
            attempt_revision: inputs.attempt_revision,
            guess_fingerprint: inputs.guess_fingerprint.clone(),
            actual_fingerprint: inputs.actual_fingerprint.clone(),
            alignment,
            gaps,
            recommendation,
            degraded: false,
            created_at: Utc::now(),
        }
    }

    /// The safe default used when the judgment capability is unavailable.
    pub fn fallback(inputs: &ReconcilerInputs) -> Self {
        let mut result = Self::new(
            inputs,
            Alignment::new(0, "analysis unavailable"),
            Gaps::none(),
            Recommendation {
                action: ShareAction::Proceed,
                suggested_share_focus: None,
                suggested_content: None,
            },
        );
        result.degraded = true;
        result
    }

    pub fn matches_inputs(&self, inputs: &ReconcilerInputs) -> bool {
        self.attempt_id == inputs.attempt_id
            && self.attempt_revision == inputs.attempt_revision
            && self.guess_fingerprint == inputs.guess_fingerprint
            && self.actual_fingerprint == inputs.actual_fingerprint
    }
}
