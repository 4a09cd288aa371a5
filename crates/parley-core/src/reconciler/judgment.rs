//! The external judgment capability.
//!
//! The reconciler orchestrates; deciding how well a guess matches what the
//! subject actually expressed is delegated to an implementation of
//! [`JudgmentCapability`] (a language model, a heuristic, a human reviewer).

use super::model::{Alignment, Gaps};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Explicit per-call context, threaded through for cost attribution and
/// log correlation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgmentContext {
    pub session_id: String,
    /// Correlates every log line and judgment call of one user action.
    pub turn_id: String,
    pub guesser_id: String,
    pub subject_id: String,
    pub attempt_revision: u32,
}

/// The two texts to compare. `actual` is the subject's private content and
/// must never be routed back to the guesser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgmentRequest {
    pub guess: String,
    pub actual: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Judgment {
    pub alignment: Alignment,
    pub gaps: Gaps,
    #[serde(default)]
    pub sharing_would_help: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_share_focus: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_share_content: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JudgmentError {
    #[error("judgment capability unavailable: {0}")]
    Unavailable(String),

    #[error("judgment timed out after {0}s")]
    Timeout(u64),

    #[error("judgment response invalid: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait JudgmentCapability: Send + Sync {
    async fn judge(
        &self,
        context: &JudgmentContext,
        request: &JudgmentRequest,
    ) -> Result<Judgment, JudgmentError>;
}
