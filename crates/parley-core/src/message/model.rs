//! Private conversation messages.

use crate::stage::Stage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A message a user wrote in one stage. Only its author can read it; the
/// witness-stage messages are what the reconciler compares guesses against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub user_id: String,
    pub stage: Stage,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(session_id: &str, user_id: &str, stage: Stage, content: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            stage,
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }
}
