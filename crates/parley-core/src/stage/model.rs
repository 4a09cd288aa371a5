//! Stage domain model.

use super::gates::{GateKey, StageGates};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// The five stages every partner walks through, in order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    AsRefStr,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    Onboarding,
    Witness,
    Perspective,
    NeedMapping,
    StrategicRepair,
}

impl Stage {
    pub fn ordinal(self) -> u8 {
        match self {
            Self::Onboarding => 0,
            Self::Witness => 1,
            Self::Perspective => 2,
            Self::NeedMapping => 3,
            Self::StrategicRepair => 4,
        }
    }

    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            0 => Some(Self::Onboarding),
            1 => Some(Self::Witness),
            2 => Some(Self::Perspective),
            3 => Some(Self::NeedMapping),
            4 => Some(Self::StrategicRepair),
            _ => None,
        }
    }

    pub fn next(self) -> Option<Self> {
        Self::from_ordinal(self.ordinal() + 1)
    }

    pub fn is_last(self) -> bool {
        self.next().is_none()
    }

    /// Gates that must all be satisfied for this stage to be completed.
    pub fn required_gates(self) -> &'static [GateKey] {
        match self {
            Self::Onboarding => &[GateKey::CompactSigned],
            Self::Witness => &[GateKey::FeelHeardConfirmed],
            Self::Perspective => &[GateKey::EmpathyConsented, GateKey::PartnerValidated],
            Self::NeedMapping => &[GateKey::NeedsConfirmed, GateKey::CommonGroundConfirmed],
            Self::StrategicRepair => &[
                GateKey::StrategiesSubmitted,
                GateKey::RankingsSubmitted,
                GateKey::AgreementCreated,
            ],
        }
    }
}

/// Progress status of one user in one stage.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    /// No required gate satisfied yet.
    InProgress,
    /// Some, but not all, required gates satisfied.
    GatePending,
    /// Every required gate satisfied.
    Completed,
}

/// One user's progress through one stage of a session.
///
/// Rows are never deleted; advancing creates the row for the next stage and
/// leaves this one behind as history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageProgress {
    pub session_id: String,
    pub user_id: String,
    pub stage: Stage,
    pub status: StageStatus,
    pub gates: StageGates,
    /// Optimistic concurrency token, bumped by every successful update.
    pub version: u64,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl StageProgress {
    pub fn new(session_id: &str, user_id: &str, stage: Stage, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            stage,
            status: StageStatus::InProgress,
            gates: StageGates::new(stage),
            version: 0,
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == StageStatus::Completed
    }

    /// The only view of this row a partner is allowed to see.
    pub fn partner_view(&self) -> PartnerStage {
        PartnerStage {
            stage: self.stage,
            status: self.status,
        }
    }
}

/// Partner-facing projection of a [`StageProgress`]: stage and status only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerStage {
    pub stage: Stage,
    pub status: StageStatus,
}
