//! Stage Progress Store.
//!
//! Atomic read-modify-write of one user's gates in one stage. Writers on the
//! same (session, user, stage) tuple are serialized in-process by a keyed
//! lock; the repository's optimistic version check covers writers outside
//! this process and is retried a bounded number of times.

use crate::locks::KeyedLocks;
use chrono::Utc;
use parley_core::stage::{
    GateEvaluator, GateKey, Stage, StageProgress, StageProgressRepository, StageStatus,
};
use parley_core::{ParleyError, Result};
use std::sync::Arc;

type TupleKey = (String, String, Stage);

/// Result of a gate write.
#[derive(Debug, Clone)]
pub struct GateChange {
    pub progress: StageProgress,
    /// False when every requested value was already in place.
    pub changed: bool,
    /// The write moved the stage to `COMPLETED`.
    pub completed_now: bool,
}

pub struct StageProgressStore {
    repository: Arc<dyn StageProgressRepository>,
    locks: KeyedLocks<TupleKey>,
    max_write_retries: u32,
}

impl StageProgressStore {
    pub fn new(repository: Arc<dyn StageProgressRepository>, max_write_retries: u32) -> Self {
        Self {
            repository,
            locks: KeyedLocks::new(),
            max_write_retries,
        }
    }

    /// The user's current (highest entered) stage progress.
    pub async fn get(&self, session_id: &str, user_id: &str) -> Result<StageProgress> {
        self.repository
            .find_latest(session_id, user_id)
            .await?
            .ok_or_else(|| {
                ParleyError::not_found("StageProgress", format!("{session_id}/{user_id}"))
            })
    }

    pub async fn find(
        &self,
        session_id: &str,
        user_id: &str,
        stage: Stage,
    ) -> Result<Option<StageProgress>> {
        self.repository.find(session_id, user_id, stage).await
    }

    pub async fn find_latest(&self, session_id: &str, user_id: &str) -> Result<Option<StageProgress>> {
        self.repository.find_latest(session_id, user_id).await
    }

    pub async fn list(&self, session_id: &str, user_id: &str) -> Result<Vec<StageProgress>> {
        self.repository.list_for_user(session_id, user_id).await
    }

    /// Returns the row for `stage`, creating it when missing.
    ///
    /// The boolean is true when this call created the row.
    pub async fn ensure(
        &self,
        session_id: &str,
        user_id: &str,
        stage: Stage,
    ) -> Result<(StageProgress, bool)> {
        let key = (session_id.to_string(), user_id.to_string(), stage);
        let _guard = self.locks.acquire(&key).await;

        if let Some(existing) = self.repository.find(session_id, user_id, stage).await? {
            return Ok((existing, false));
        }

        let progress = StageProgress::new(session_id, user_id, stage, Utc::now());
        match self.repository.create(&progress).await {
            Ok(()) => {
                tracing::debug!(
                    target: "stage_machine",
                    session_id,
                    user_id,
                    stage = stage.ordinal(),
                    "stage progress created"
                );
                Ok((progress, true))
            }
            // Created concurrently by another process.
            Err(err) if err.is_conflict() => {
                let existing = self
                    .repository
                    .find(session_id, user_id, stage)
                    .await?
                    .ok_or(err)?;
                Ok((existing, false))
            }
            Err(err) => Err(err),
        }
    }

    pub async fn upsert_gate(
        &self,
        session_id: &str,
        user_id: &str,
        stage: Stage,
        key: GateKey,
        value: bool,
        create: bool,
    ) -> Result<GateChange> {
        self.upsert_gates(session_id, user_id, stage, &[(key, value)], create)
            .await
    }

    /// Applies several gate writes to one row atomically.
    ///
    /// Fails with `NotFound` when the row does not exist and `create` is
    /// false, and with `Conflict` when a write would un-set a gate of a
    /// completed stage.
    pub async fn upsert_gates(
        &self,
        session_id: &str,
        user_id: &str,
        stage: Stage,
        writes: &[(GateKey, bool)],
        create: bool,
    ) -> Result<GateChange> {
        let key = (session_id.to_string(), user_id.to_string(), stage);
        let _guard = self.locks.acquire(&key).await;

        let mut attempt = 0;
        loop {
            let current = match self.repository.find(session_id, user_id, stage).await? {
                Some(progress) => progress,
                None if create => {
                    let progress = StageProgress::new(session_id, user_id, stage, Utc::now());
                    match self.repository.create(&progress).await {
                        Ok(()) => progress,
                        Err(err) if err.is_conflict() => continue,
                        Err(err) => return Err(err),
                    }
                }
                None => {
                    return Err(ParleyError::not_found(
                        "StageProgress",
                        format!("{session_id}/{user_id}/{}", stage.ordinal()),
                    ));
                }
            };

            let Some(next) = apply_writes(&current, writes)? else {
                return Ok(GateChange {
                    progress: current,
                    changed: false,
                    completed_now: false,
                });
            };

            match self.repository.update(&next).await {
                Ok(stored) => {
                    let completed_now = !current.is_completed() && stored.is_completed();
                    tracing::info!(
                        target: "stage_machine",
                        session_id,
                        user_id,
                        stage = stage.ordinal(),
                        status = %stored.status,
                        "gates updated"
                    );
                    return Ok(GateChange {
                        progress: stored,
                        changed: true,
                        completed_now,
                    });
                }
                Err(err) if err.is_conflict() && attempt < self.max_write_retries => {
                    attempt += 1;
                    tracing::debug!(
                        target: "stage_machine",
                        session_id,
                        user_id,
                        attempt,
                        "stage progress version race, retrying"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Computes the row after `writes`, or `None` when nothing changes.
fn apply_writes(current: &StageProgress, writes: &[(GateKey, bool)]) -> Result<Option<StageProgress>> {
    let now = Utc::now();
    let mut next = current.clone();
    let mut changed = false;

    for (key, value) in writes {
        if current.is_completed() && !value && current.gates.is_set(*key) {
            return Err(ParleyError::conflict(
                format!("gate '{key}' cannot be un-set on a completed stage"),
                current.status,
            ));
        }
        changed |= next.gates.set(*key, *value, now)?;
    }

    if !changed {
        return Ok(None);
    }

    next.status = GateEvaluator::status_for(&next.gates);
    if next.status == StageStatus::Completed && next.completed_at.is_none() {
        next.completed_at = Some(now);
    }
    next.updated_at = now;
    Ok(Some(next))
}
