//! Per-stage gate maps.
//!
//! Each stage owns a fixed set of gates. A gate is either unset or holds the
//! timestamp at which it became satisfied. The set of stages is closed, so
//! adding a stage means adding a variant here and the compiler points at
//! every match that needs to learn about it.

use super::model::Stage;
use crate::error::{ParleyError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

/// Names of every gate across all stages.
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
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum GateKey {
    CompactSigned,
    FeelHeardConfirmed,
    EmpathyDraftReady,
    EmpathyConsented,
    PartnerValidated,
    NeedsConfirmed,
    CommonGroundConfirmed,
    StrategiesSubmitted,
    RankingsSubmitted,
    AgreementCreated,
}

impl GateKey {
    /// The stage this gate belongs to.
    pub fn stage(self) -> Stage {
        match self {
            Self::CompactSigned => Stage::Onboarding,
            Self::FeelHeardConfirmed => Stage::Witness,
            Self::EmpathyDraftReady | Self::EmpathyConsented | Self::PartnerValidated => {
                Stage::Perspective
            }
            Self::NeedsConfirmed | Self::CommonGroundConfirmed => Stage::NeedMapping,
            Self::StrategiesSubmitted | Self::RankingsSubmitted | Self::AgreementCreated => {
                Stage::StrategicRepair
            }
        }
    }

    /// Gates written only by the empathy exchange, never by `confirm_gate`.
    pub fn is_exchange_managed(self) -> bool {
        matches!(
            self,
            Self::EmpathyDraftReady | Self::EmpathyConsented | Self::PartnerValidated
        )
    }

    /// Parses a caller-supplied key and checks that it belongs to `stage`.
    pub fn parse_for(stage: Stage, raw: &str) -> Result<Self> {
        let key: GateKey = raw
            .parse()
            .map_err(|_| ParleyError::validation(format!("unknown gate key '{raw}'")))?;
        if key.stage() != stage {
            return Err(ParleyError::validation(format!(
                "gate '{raw}' does not belong to stage {}",
                stage.ordinal()
            )));
        }
        Ok(key)
    }

    /// All gate keys of one stage, in declaration order.
    pub fn for_stage(stage: Stage) -> Vec<GateKey> {
        GateKey::iter().filter(|k| k.stage() == stage).collect()
    }
}

type GateStamp = Option<DateTime<Utc>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingGates {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compact_signed: GateStamp,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WitnessGates {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feel_heard_confirmed: GateStamp,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerspectiveGates {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empathy_draft_ready: GateStamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empathy_consented: GateStamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner_validated: GateStamp,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NeedMappingGates {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_confirmed: GateStamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_ground_confirmed: GateStamp,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategicRepairGates {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategies_submitted: GateStamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rankings_submitted: GateStamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agreement_created: GateStamp,
}

/// The gate map of a single stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageGates {
    Onboarding(OnboardingGates),
    Witness(WitnessGates),
    Perspective(PerspectiveGates),
    NeedMapping(NeedMappingGates),
    StrategicRepair(StrategicRepairGates),
}

impl StageGates {
    /// An empty gate map for `stage`.
    pub fn new(stage: Stage) -> Self {
        match stage {
            Stage::Onboarding => Self::Onboarding(OnboardingGates::default()),
            Stage::Witness => Self::Witness(WitnessGates::default()),
            Stage::Perspective => Self::Perspective(PerspectiveGates::default()),
            Stage::NeedMapping => Self::NeedMapping(NeedMappingGates::default()),
            Stage::StrategicRepair => Self::StrategicRepair(StrategicRepairGates::default()),
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            Self::Onboarding(_) => Stage::Onboarding,
            Self::Witness(_) => Stage::Witness,
            Self::Perspective(_) => Stage::Perspective,
            Self::NeedMapping(_) => Stage::NeedMapping,
            Self::StrategicRepair(_) => Stage::StrategicRepair,
        }
    }

    /// Timestamp of a gate, or `None` when the key is unset or belongs to another stage.
    pub fn satisfied_at(&self, key: GateKey) -> Option<DateTime<Utc>> {
        self.slot(key).copied().flatten()
    }

    pub fn is_set(&self, key: GateKey) -> bool {
        self.satisfied_at(key).is_some()
    }

    /// Sets or clears a gate. Returns whether the map changed.
    ///
    /// Setting an already-satisfied gate keeps its original timestamp.
    pub fn set(&mut self, key: GateKey, value: bool, at: DateTime<Utc>) -> Result<bool> {
        let stage = self.stage();
        let slot = self.slot_mut(key).ok_or_else(|| {
            ParleyError::validation(format!(
                "gate '{key}' does not belong to stage {}",
                stage.ordinal()
            ))
        })?;

        let changed = match (slot.is_some(), value) {
            (false, true) => {
                *slot = Some(at);
                true
            }
            (true, false) => {
                *slot = None;
                true
            }
            _ => false,
        };
        Ok(changed)
    }

    /// Every gate of this stage with its current stamp.
    pub fn entries(&self) -> Vec<(GateKey, Option<DateTime<Utc>>)> {
        GateKey::for_stage(self.stage())
            .into_iter()
            .map(|key| (key, self.satisfied_at(key)))
            .collect()
    }

    fn slot(&self, key: GateKey) -> Option<&GateStamp> {
        match (self, key) {
            (Self::Onboarding(g), GateKey::CompactSigned) => Some(&g.compact_signed),
            (Self::Witness(g), GateKey::FeelHeardConfirmed) => Some(&g.feel_heard_confirmed),
            (Self::Perspective(g), GateKey::EmpathyDraftReady) => Some(&g.empathy_draft_ready),
            (Self::Perspective(g), GateKey::EmpathyConsented) => Some(&g.empathy_consented),
            (Self::Perspective(g), GateKey::PartnerValidated) => Some(&g.partner_validated),
            (Self::NeedMapping(g), GateKey::NeedsConfirmed) => Some(&g.needs_confirmed),
            (Self::NeedMapping(g), GateKey::CommonGroundConfirmed) => {
                Some(&g.common_ground_confirmed)
            }
            (Self::StrategicRepair(g), GateKey::StrategiesSubmitted) => {
                Some(&g.strategies_submitted)
            }
            (Self::StrategicRepair(g), GateKey::RankingsSubmitted) => Some(&g.rankings_submitted),
            (Self::StrategicRepair(g), GateKey::AgreementCreated) => Some(&g.agreement_created),
            _ => None,
        }
    }

    fn slot_mut(&mut self, key: GateKey) -> Option<&mut GateStamp> {
        match (self, key) {
            (Self::Onboarding(g), GateKey::CompactSigned) => Some(&mut g.compact_signed),
            (Self::Witness(g), GateKey::FeelHeardConfirmed) => Some(&mut g.feel_heard_confirmed),
            (Self::Perspective(g), GateKey::EmpathyDraftReady) => Some(&mut g.empathy_draft_ready),
            (Self::Perspective(g), GateKey::EmpathyConsented) => Some(&mut g.empathy_consented),
            (Self::Perspective(g), GateKey::PartnerValidated) => Some(&mut g.partner_validated),
            (Self::NeedMapping(g), GateKey::NeedsConfirmed) => Some(&mut g.needs_confirmed),
            (Self::NeedMapping(g), GateKey::CommonGroundConfirmed) => {
                Some(&mut g.common_ground_confirmed)
            }
            (Self::StrategicRepair(g), GateKey::StrategiesSubmitted) => {
                Some(&mut g.strategies_submitted)
            }
            (Self::StrategicRepair(g), GateKey::RankingsSubmitted) => {
                Some(&mut g.rankings_submitted)
            }
            (Self::StrategicRepair(g), GateKey::AgreementCreated) => {
                Some(&mut g.agreement_created)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_for_rejects_foreign_and_unknown_keys() {
        assert_eq!(
            GateKey::parse_for(Stage::Witness, "feelHeardConfirmed").unwrap(),
            GateKey::FeelHeardConfirmed
        );
        assert!(GateKey::parse_for(Stage::Witness, "needsConfirmed")
            .unwrap_err()
            .is_validation());
        assert!(GateKey::parse_for(Stage::Witness, "feel_heard")
            .unwrap_err()
            .is_validation());
    }

    #[test]
    fn test_set_keeps_first_timestamp() {
        let mut gates = StageGates::new(Stage::Witness);
        let first = Utc::now();
        let later = first + chrono::Duration::seconds(30);

        assert!(gates.set(GateKey::FeelHeardConfirmed, true, first).unwrap());
        assert!(!gates.set(GateKey::FeelHeardConfirmed, true, later).unwrap());
        assert_eq!(gates.satisfied_at(GateKey::FeelHeardConfirmed), Some(first));

        assert!(gates.set(GateKey::FeelHeardConfirmed, false, later).unwrap());
        assert!(!gates.is_set(GateKey::FeelHeardConfirmed));
    }

    #[test]
    fn test_set_rejects_key_of_other_stage() {
        let mut gates = StageGates::new(Stage::NeedMapping);
        let err = gates
            .set(GateKey::CompactSigned, true, Utc::now())
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_entries_cover_every_key_of_the_stage() {
        let gates = StageGates::new(Stage::StrategicRepair);
        let keys: Vec<GateKey> = gates.entries().into_iter().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            vec![
                GateKey::StrategiesSubmitted,
                GateKey::RankingsSubmitted,
                GateKey::AgreementCreated
            ]
        );
    }

    #[test]
    fn test_serde_uses_stage_tag() {
        let mut gates = StageGates::new(Stage::Perspective);
        gates
            .set(GateKey::EmpathyConsented, true, Utc::now())
            .unwrap();
        let json = serde_json::to_value(&gates).unwrap();
        assert_eq!(json["stage"], "perspective");
        assert!(json.get("empathyConsented").is_some());
        assert!(json.get("partnerValidated").is_none());

        let back: StageGates = serde_json::from_value(json).unwrap();
        assert_eq!(back, gates);
    }
}
