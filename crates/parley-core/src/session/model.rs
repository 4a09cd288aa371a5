//! Session domain model.

use crate::error::{ParleyError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Lifecycle status of a session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Created,
    Invited,
    Active,
    /// One partner has completed the current stage and waits for the other.
    Waiting,
    Paused,
    Abandoned,
    Resolved,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Abandoned | Self::Resolved)
    }

    /// Whether gate, message and empathy actions are accepted.
    pub fn accepts_stage_actions(self) -> bool {
        matches!(
            self,
            Self::Created | Self::Invited | Self::Active | Self::Waiting
        )
    }

    pub fn can_transition_to(self, to: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, to) {
            (Created, Invited) | (Created, Abandoned) => true,
            (Invited, Active) | (Invited, Abandoned) => true,
            (Active, Waiting) | (Waiting, Active) => true,
            (Active | Waiting, Paused | Resolved | Abandoned) => true,
            (Paused, Active) | (Paused, Abandoned) => true,
            _ => false,
        }
    }
}

/// A conflict-resolution engagement between exactly two users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub relationship_id: String,
    /// The user who opened the session.
    pub initiator_id: String,
    /// The invited partner.
    pub partner_id: String,
    pub status: SessionStatus,
    /// Optimistic concurrency token, bumped by every stored update.
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(relationship_id: &str, initiator_id: &str, partner_id: &str) -> Result<Self> {
        if initiator_id.trim().is_empty() || partner_id.trim().is_empty() {
            return Err(ParleyError::validation("session members must have ids"));
        }
        if initiator_id == partner_id {
            return Err(ParleyError::validation(
                "a session needs two distinct members",
            ));
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            relationship_id: relationship_id.to_string(),
            initiator_id: initiator_id.to_string(),
            partner_id: partner_id.to_string(),
            status: SessionStatus::Created,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn members(&self) -> [&str; 2] {
        [&self.initiator_id, &self.partner_id]
    }

    pub fn is_member(&self, user_id: &str) -> bool {
        self.initiator_id == user_id || self.partner_id == user_id
    }

    /// The other member, or `None` if `user_id` is not a member.
    pub fn partner_of(&self, user_id: &str) -> Option<&str> {
        if self.initiator_id == user_id {
            Some(&self.partner_id)
        } else if self.partner_id == user_id {
            Some(&self.initiator_id)
        } else {
            None
        }
    }

    /// Moves to `to`, rejecting transitions the lifecycle does not allow.
    pub fn transition(&mut self, to: SessionStatus) -> Result<()> {
        if self.status == to {
            return Ok(());
        }
        if !self.status.can_transition_to(to) {
            return Err(ParleyError::conflict(
                format!("session cannot move to {to}"),
                self.status,
            ));
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_single_member() {
        assert!(Session::new("rel", "alice", "alice").unwrap_err().is_validation());
        assert!(Session::new("rel", "", "bob").unwrap_err().is_validation());
    }

    #[test]
    fn test_partner_of() {
        let session = Session::new("rel", "alice", "bob").unwrap();
        assert_eq!(session.partner_of("alice"), Some("bob"));
        assert_eq!(session.partner_of("bob"), Some("alice"));
        assert_eq!(session.partner_of("mallory"), None);
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut session = Session::new("rel", "alice", "bob").unwrap();
        session.transition(SessionStatus::Invited).unwrap();
        session.transition(SessionStatus::Active).unwrap();
        session.transition(SessionStatus::Paused).unwrap();
        assert!(!session.status.accepts_stage_actions());
        session.transition(SessionStatus::Active).unwrap();
        session.transition(SessionStatus::Resolved).unwrap();
        assert!(session.status.is_terminal());

        let err = session.transition(SessionStatus::Active).unwrap_err();
        match err {
            ParleyError::Conflict { current_state, .. } => assert_eq!(current_state, "RESOLVED"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
