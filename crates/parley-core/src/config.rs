//! Runtime configuration model.
//!
//! Every section has serde defaults, so a partial (or empty) TOML file is a
//! valid configuration.

use crate::error::{ParleyError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ParleyConfig {
    pub reconciler: ReconcilerConfig,
    pub share_offer: ShareOfferConfig,
    pub empathy: EmpathyConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

impl ParleyConfig {
    /// Rejects values no component can work with.
    pub fn validate(&self) -> Result<()> {
        if self.reconciler.judge_timeout_secs == 0 {
            return Err(ParleyError::config(
                "reconciler.judge_timeout_secs must be greater than zero",
            ));
        }
        if self.share_offer.min_content_chars == 0 {
            return Err(ParleyError::config(
                "share_offer.min_content_chars must be at least 1",
            ));
        }
        if self.share_offer.min_content_chars > self.share_offer.max_content_chars {
            return Err(ParleyError::config(
                "share_offer.min_content_chars exceeds share_offer.max_content_chars",
            ));
        }
        if self.empathy.max_content_chars == 0 {
            return Err(ParleyError::config(
                "empathy.max_content_chars must be greater than zero",
            ));
        }
        Ok(())
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Upper bound on one judgment call.
    pub judge_timeout_secs: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            judge_timeout_secs: 30,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ShareOfferConfig {
    pub min_content_chars: usize,
    pub max_content_chars: usize,
}

impl Default for ShareOfferConfig {
    fn default() -> Self {
        Self {
            min_content_chars: 1,
            max_content_chars: 2000,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct EmpathyConfig {
    pub max_content_chars: usize,
}

impl Default for EmpathyConfig {
    fn default() -> Self {
        Self {
            max_content_chars: 4000,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    /// When set, the in-memory store mirrors itself into this TOML file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_path: Option<PathBuf>,
    /// Retries of a read-modify-write that lost an optimistic version race.
    pub max_write_retries: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            snapshot_path: None,
            max_write_retries: 3,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}
