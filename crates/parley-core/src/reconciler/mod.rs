//! Empathy reconciler domain module.
//!
//! - `model`: results, severity classification
//! - `judgment`: the external judgment capability
//! - `repository`: result persistence

mod judgment;
mod model;
mod repository;

pub use judgment::{Judgment, JudgmentCapability, JudgmentContext, JudgmentError, JudgmentRequest};
pub use model::{
    Alignment, GapSeverity, Gaps, ReconcilerInputs, ReconcilerResult, Recommendation, ShareAction,
};
pub use repository::ReconcilerResultRepository;
