//! Empathy attempt domain model.

use crate::error::{ParleyError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// One direction of the empathy exchange: who guesses about whom.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Direction {
    pub guesser_id: String,
    pub subject_id: String,
}

impl Direction {
    pub fn new(guesser_id: impl Into<String>, subject_id: impl Into<String>) -> Self {
        Self {
            guesser_id: guesser_id.into(),
            subject_id: subject_id.into(),
        }
    }

    pub fn reversed(&self) -> Self {
        Self::new(self.subject_id.clone(), self.guesser_id.clone())
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}->{}", self.guesser_id, self.subject_id)
    }
}

/// State of an empathy attempt.
///
/// ```text
/// HELD -> ANALYZING -> AWAITING_SHARING -> REFINING -> ANALYZING ...
///                   \-> READY -> REVEALED -> VALIDATED
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EmpathyStatus {
    /// Submitted, but the partner has not submitted theirs yet.
    Held,
    /// A reconciler run is in flight; re-submission is locked.
    Analyzing,
    /// The subject has been offered to share context.
    AwaitingSharing,
    /// The guesser is revising after receiving shared context.
    Refining,
    /// No gap left (or the offer was declined); waiting for mutual reveal.
    Ready,
    /// Readable by the subject.
    Revealed,
    /// The subject has judged the statement's accuracy.
    Validated,
}

impl EmpathyStatus {
    pub fn can_transition_to(self, to: EmpathyStatus) -> bool {
        use EmpathyStatus::*;
        matches!(
            (self, to),
            (Held, Analyzing)
                | (Analyzing, AwaitingSharing)
                | (Analyzing, Ready)
                | (AwaitingSharing, Refining)
                | (AwaitingSharing, Ready)
                | (Refining, Analyzing)
                | (Ready, Revealed)
                | (Ready, Analyzing)
                | (Revealed, Validated)
                | (Revealed, Analyzing)
                | (Validated, Analyzing)
        )
    }

    /// Whether the guesser may submit new content in this state.
    pub fn accepts_resubmission(self) -> bool {
        matches!(
            self,
            Self::Held | Self::Refining | Self::Ready | Self::Revealed | Self::Validated
        )
    }

    /// Whether the subject may read the statement.
    pub fn is_visible_to_subject(self) -> bool {
        matches!(self, Self::Revealed | Self::Validated)
    }

    /// Ready or beyond: counts as "ready" for the mutual reveal rule.
    pub fn is_reveal_eligible(self) -> bool {
        matches!(self, Self::Ready | Self::Revealed | Self::Validated)
    }
}

/// The subject's verdict on a revealed statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmpathyValidation {
    pub accurate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    /// Revision the verdict applies to.
    pub revision: u32,
    pub validated_at: DateTime<Utc>,
}

/// A guesser's statement of what they believe the partner feels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmpathyAttempt {
    pub id: String,
    pub session_id: String,
    pub guesser_id: String,
    pub subject_id: String,
    pub content: String,
    pub status: EmpathyStatus,
    /// Number of re-submissions after the first analysis.
    pub revision_count: u32,
    /// Whether the current content has been through at least one analysis.
    #[serde(default)]
    pub analyzed: bool,
    pub version: u64,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revealed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<EmpathyValidation>,
}

impl EmpathyAttempt {
    pub fn new(session_id: &str, direction: &Direction, content: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            guesser_id: direction.guesser_id.clone(),
            subject_id: direction.subject_id.clone(),
            content: content.to_string(),
            status: EmpathyStatus::Held,
            revision_count: 0,
            analyzed: false,
            version: 0,
            submitted_at: now,
            updated_at: now,
            revealed_at: None,
            validation: None,
        }
    }

    pub fn direction(&self) -> Direction {
        Direction::new(self.guesser_id.clone(), self.subject_id.clone())
    }

    /// Applies a state change, rejecting moves the state machine does not allow.
    pub fn transition(&mut self, to: EmpathyStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(ParleyError::conflict(
                format!("empathy attempt cannot move to {to}"),
                self.status,
            ));
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Replaces the content. A revision is counted once the previous content
    /// has been analysed; the previous reveal and verdict are dropped.
    ///
    /// A statement that was ready or revealed goes back to `REFINING` in the
    /// same write, so unanalysed content is never reveal-eligible or visible
    /// to the subject.
    pub fn resubmit(&mut self, content: &str) -> Result<()> {
        if !self.status.accepts_resubmission() {
            return Err(ParleyError::conflict(
                "empathy attempt is locked for re-submission",
                self.status,
            ));
        }
        if self.analyzed {
            self.revision_count += 1;
        }
        if self.status.is_reveal_eligible() {
            self.status = EmpathyStatus::Refining;
        }
        self.analyzed = false;
        self.content = content.to_string();
        self.revealed_at = None;
        self.validation = None;
        self.submitted_at = Utc::now();
        self.updated_at = self.submitted_at;
        Ok(())
    }
}
