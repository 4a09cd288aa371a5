//! Stage domain module.
//!
//! - `model`: stages, progress rows and the partner projection
//! - `gates`: typed per-stage gate maps
//! - `evaluator`: pure gate rules
//! - `repository`: persistence trait for progress rows

mod evaluator;
mod gates;
mod model;
mod repository;

pub use evaluator::{GateEvaluation, GateEvaluator};
pub use gates::{
    GateKey, NeedMappingGates, OnboardingGates, PerspectiveGates, StageGates,
    StrategicRepairGates, WitnessGates,
};
pub use model::{PartnerStage, Stage, StageProgress, StageStatus};
pub use repository::StageProgressRepository;
