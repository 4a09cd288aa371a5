//! Realtime events published to session members.
//!
//! Payloads carry ids, stage numbers and statuses only. Private content
//! (witness messages, empathy statements, shared context) never rides on an
//! event; clients fetch it through the scoped read operations.

use super::model::SessionStatus;
use crate::empathy::EmpathyStatus;
use crate::stage::{Stage, StageStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionStatusChanged {
        status: SessionStatus,
    },
    GateUpdated {
        user_id: String,
        stage: Stage,
        status: StageStatus,
    },
    /// Both members entered `stage`.
    StageAdvanced {
        stage: Stage,
    },
    MessageRecorded {
        user_id: String,
        stage: Stage,
    },
    EmpathyStatusChanged {
        guesser_id: String,
        status: EmpathyStatus,
        revision: u32,
    },
    EmpathyRevealed {
        guesser_ids: Vec<String>,
    },
    EmpathyValidated {
        guesser_id: String,
        accurate: bool,
    },
    ShareOfferAvailable {
        subject_id: String,
        offer_id: String,
    },
    SharedContextAvailable {
        guesser_id: String,
        offer_id: String,
    },
}

impl SessionEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionStatusChanged { .. } => "session.status_changed",
            Self::GateUpdated { .. } => "stage.gate_updated",
            Self::StageAdvanced { .. } => "stage.advanced",
            Self::MessageRecorded { .. } => "message.recorded",
            Self::EmpathyStatusChanged { .. } => "empathy.status_changed",
            Self::EmpathyRevealed { .. } => "empathy.revealed",
            Self::EmpathyValidated { .. } => "empathy.validated",
            Self::ShareOfferAvailable { .. } => "share_offer.available",
            Self::SharedContextAvailable { .. } => "shared_context.available",
        }
    }
}

/// Fire-and-forget fan-out to the connected clients of a session.
///
/// Delivery is not guaranteed and the core never waits on an
/// acknowledgement; callers submit publishes as detached jobs.
#[async_trait]
pub trait SessionEventPublisher: Send + Sync {
    async fn publish(&self, session_id: &str, event: &SessionEvent) -> Result<(), String>;
}

/// A publisher that drops every event.
pub struct NoOpEventPublisher;

#[async_trait]
impl SessionEventPublisher for NoOpEventPublisher {
    async fn publish(&self, _session_id: &str, _event: &SessionEvent) -> Result<(), String> {
        Ok(())
    }
}
