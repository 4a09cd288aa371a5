//! Pure gate rules.
//!
//! Nothing here touches storage: the evaluator takes gate maps and partner
//! projections and answers whether a stage is satisfied or may be left.

use super::gates::{GateKey, StageGates};
use super::model::{PartnerStage, Stage, StageProgress, StageStatus};
use crate::error::StageBlocked;
use serde::{Deserialize, Serialize};

/// Outcome of evaluating one stage's gate map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateEvaluation {
    pub stage: Stage,
    pub satisfied: bool,
    /// Required gates that are still unset, in rule order.
    pub unsatisfied: Vec<GateKey>,
}

pub struct GateEvaluator;

impl GateEvaluator {
    /// Evaluates a gate map against its stage's rule.
    pub fn evaluate(gates: &StageGates) -> GateEvaluation {
        let stage = gates.stage();
        let unsatisfied: Vec<GateKey> = stage
            .required_gates()
            .iter()
            .copied()
            .filter(|key| !gates.is_set(*key))
            .collect();

        GateEvaluation {
            stage,
            satisfied: unsatisfied.is_empty(),
            unsatisfied,
        }
    }

    /// Derives the progress status implied by a gate map.
    pub fn status_for(gates: &StageGates) -> StageStatus {
        let required = gates.stage().required_gates();
        let set = required.iter().filter(|key| gates.is_set(**key)).count();
        if set == required.len() {
            StageStatus::Completed
        } else if set == 0 {
            StageStatus::InProgress
        } else {
            StageStatus::GatePending
        }
    }

    /// Whether `own` may leave its stage.
    ///
    /// Requires the caller's own gates to be satisfied and the partner to
    /// have completed the same stage. Only the partner's completion fact is
    /// consulted.
    pub fn can_advance(
        own: &StageProgress,
        partner: Option<PartnerStage>,
    ) -> Result<(), StageBlocked> {
        let evaluation = Self::evaluate(&own.gates);
        let partner_completed = partner
            .map(|p| p.stage > own.stage || (p.stage == own.stage && p.status == StageStatus::Completed))
            .unwrap_or(false);

        if evaluation.satisfied && partner_completed {
            Ok(())
        } else {
            Err(StageBlocked {
                stage: own.stage,
                unsatisfied_gates: evaluation.unsatisfied,
                partner_completed,
            })
        }
    }
}
