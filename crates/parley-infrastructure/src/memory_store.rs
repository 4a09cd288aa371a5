//! In-memory entity store.
//!
//! `MemoryStore` implements every repository trait of the domain layer. Each
//! collection sits behind its own lock, versioned entities are updated with
//! an optimistic version check, and the whole state can optionally be
//! mirrored into a TOML snapshot after every write.

use crate::storage::AtomicTomlFile;
use async_trait::async_trait;
use parley_core::consent::{ConsentRecord, ConsentRepository};
use parley_core::empathy::{EmpathyAttempt, EmpathyAttemptRepository};
use parley_core::message::{Message, MessageRepository};
use parley_core::reconciler::{ReconcilerResult, ReconcilerResultRepository};
use parley_core::session::{Session, SessionRepository};
use parley_core::share::{ShareOffer, ShareOfferRepository};
use parley_core::stage::{Stage, StageProgress, StageProgressRepository};
use parley_core::{ParleyError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

type ProgressKey = (String, String, Stage);

/// Serialized form of the whole store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSnapshot {
    pub sessions: Vec<Session>,
    pub stage_progress: Vec<StageProgress>,
    pub empathy_attempts: Vec<EmpathyAttempt>,
    pub reconciler_results: Vec<ReconcilerResult>,
    pub share_offers: Vec<ShareOffer>,
    pub consents: Vec<ConsentRecord>,
    pub messages: Vec<Message>,
}

#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, Session>>,
    progress: RwLock<HashMap<ProgressKey, StageProgress>>,
    attempts: RwLock<HashMap<String, EmpathyAttempt>>,
    results: RwLock<Vec<ReconcilerResult>>,
    offers: RwLock<Vec<ShareOffer>>,
    consents: RwLock<Vec<ConsentRecord>>,
    messages: RwLock<Vec<Message>>,
    snapshot: Option<Arc<AtomicTomlFile<StoreSnapshot>>>,
    /// Serializes snapshot writes so the last writer persists the newest state.
    snapshot_lock: Mutex<()>,
}

impl MemoryStore {
    /// A store that lives only in memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store mirrored into `path`, seeded from it when the file exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let file = AtomicTomlFile::<StoreSnapshot>::new(path.into());
        let snapshot = file.load()?.unwrap_or_default();
        tracing::info!(
            path = %file.path().display(),
            sessions = snapshot.sessions.len(),
            "opened store snapshot"
        );

        let mut store = Self::from_snapshot(snapshot);
        store.snapshot = Some(Arc::new(file));
        Ok(store)
    }

    fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let sessions = snapshot
            .sessions
            .into_iter()
            .map(|s| (s.id.clone(), s))
            .collect();
        let progress = snapshot
            .stage_progress
            .into_iter()
            .map(|p| ((p.session_id.clone(), p.user_id.clone(), p.stage), p))
            .collect();
        let attempts = snapshot
            .empathy_attempts
            .into_iter()
            .map(|a| (a.id.clone(), a))
            .collect();

        Self {
            sessions: RwLock::new(sessions),
            progress: RwLock::new(progress),
            attempts: RwLock::new(attempts),
            results: RwLock::new(snapshot.reconciler_results),
            offers: RwLock::new(snapshot.share_offers),
            consents: RwLock::new(snapshot.consents),
            messages: RwLock::new(snapshot.messages),
            snapshot: None,
            snapshot_lock: Mutex::new(()),
        }
    }

    /// Copies the current state out of every collection.
    pub async fn snapshot(&self) -> StoreSnapshot {
        let mut sessions: Vec<Session> = self.sessions.read().await.values().cloned().collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let mut stage_progress: Vec<StageProgress> =
            self.progress.read().await.values().cloned().collect();
        stage_progress.sort_by(|a, b| {
            (&a.session_id, &a.user_id, a.stage).cmp(&(&b.session_id, &b.user_id, b.stage))
        });

        let mut empathy_attempts: Vec<EmpathyAttempt> =
            self.attempts.read().await.values().cloned().collect();
        empathy_attempts.sort_by(|a, b| (&a.session_id, &a.guesser_id).cmp(&(&b.session_id, &b.guesser_id)));

        StoreSnapshot {
            sessions,
            stage_progress,
            empathy_attempts,
            reconciler_results: self.results.read().await.clone(),
            share_offers: self.offers.read().await.clone(),
            consents: self.consents.read().await.clone(),
            messages: self.messages.read().await.clone(),
        }
    }

    async fn persist(&self) -> Result<()> {
        let Some(file) = &self.snapshot else {
            return Ok(());
        };

        let _guard = self.snapshot_lock.lock().await;
        let snapshot = self.snapshot().await;
        let file = Arc::clone(file);
        tokio::task::spawn_blocking(move || file.save(&snapshot))
            .await
            .map_err(|e| ParleyError::internal(format!("snapshot task failed: {e}")))??;
        Ok(())
    }
}

fn version_conflict(entity: &str, expected: u64, stored: u64) -> ParleyError {
    ParleyError::conflict(
        format!("{entity} was modified concurrently (expected version {expected})"),
        format!("version {stored}"),
    )
}

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn find_by_id(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn create(&self, session: &Session) -> Result<()> {
        {
            let mut sessions = self.sessions.write().await;
            if let Some(existing) = sessions.get(&session.id) {
                return Err(ParleyError::conflict("session already exists", existing.status));
            }
            sessions.insert(session.id.clone(), session.clone());
        }
        self.persist().await
    }

    async fn update(&self, session: &Session) -> Result<Session> {
        let stored = {
            let mut sessions = self.sessions.write().await;
            let current = sessions
                .get_mut(&session.id)
                .ok_or_else(|| ParleyError::not_found("Session", session.id.clone()))?;
            if current.version != session.version {
                return Err(version_conflict("session", session.version, current.version));
            }
            let mut next = session.clone();
            next.version += 1;
            *current = next.clone();
            next
        };
        self.persist().await?;
        Ok(stored)
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.is_member(user_id))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }
}

#[async_trait]
impl StageProgressRepository for MemoryStore {
    async fn find(
        &self,
        session_id: &str,
        user_id: &str,
        stage: Stage,
    ) -> Result<Option<StageProgress>> {
        let key = (session_id.to_string(), user_id.to_string(), stage);
        Ok(self.progress.read().await.get(&key).cloned())
    }

    async fn find_latest(&self, session_id: &str, user_id: &str) -> Result<Option<StageProgress>> {
        Ok(self
            .progress
            .read()
            .await
            .values()
            .filter(|p| p.session_id == session_id && p.user_id == user_id)
            .max_by_key(|p| p.stage)
            .cloned())
    }

    async fn list_for_user(&self, session_id: &str, user_id: &str) -> Result<Vec<StageProgress>> {
        let mut rows: Vec<StageProgress> = self
            .progress
            .read()
            .await
            .values()
            .filter(|p| p.session_id == session_id && p.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by_key(|p| p.stage);
        Ok(rows)
    }

    async fn create(&self, progress: &StageProgress) -> Result<()> {
        {
            let mut rows = self.progress.write().await;
            let key = (
                progress.session_id.clone(),
                progress.user_id.clone(),
                progress.stage,
            );
            if let Some(existing) = rows.get(&key) {
                return Err(ParleyError::conflict(
                    format!("stage {} progress already exists", progress.stage.ordinal()),
                    existing.status,
                ));
            }
            rows.insert(key, progress.clone());
        }
        self.persist().await
    }

    async fn update(&self, progress: &StageProgress) -> Result<StageProgress> {
        let stored = {
            let mut rows = self.progress.write().await;
            let key = (
                progress.session_id.clone(),
                progress.user_id.clone(),
                progress.stage,
            );
            let current = rows.get_mut(&key).ok_or_else(|| {
                ParleyError::not_found(
                    "StageProgress",
                    format!("{}/{}/{}", progress.session_id, progress.user_id, progress.stage),
                )
            })?;
            if current.version != progress.version {
                return Err(version_conflict("stage progress", progress.version, current.version));
            }
            let mut next = progress.clone();
            next.version += 1;
            *current = next.clone();
            next
        };
        self.persist().await?;
        Ok(stored)
    }
}

#[async_trait]
impl EmpathyAttemptRepository for MemoryStore {
    async fn find_by_id(&self, attempt_id: &str) -> Result<Option<EmpathyAttempt>> {
        Ok(self.attempts.read().await.get(attempt_id).cloned())
    }

    async fn find_by_guesser(
        &self,
        session_id: &str,
        guesser_id: &str,
    ) -> Result<Option<EmpathyAttempt>> {
        Ok(self
            .attempts
            .read()
            .await
            .values()
            .find(|a| a.session_id == session_id && a.guesser_id == guesser_id)
            .cloned())
    }

    async fn list_for_session(&self, session_id: &str) -> Result<Vec<EmpathyAttempt>> {
        let mut attempts: Vec<EmpathyAttempt> = self
            .attempts
            .read()
            .await
            .values()
            .filter(|a| a.session_id == session_id)
            .cloned()
            .collect();
        attempts.sort_by(|a, b| a.guesser_id.cmp(&b.guesser_id));
        Ok(attempts)
    }

    async fn create(&self, attempt: &EmpathyAttempt) -> Result<()> {
        {
            let mut attempts = self.attempts.write().await;
            if let Some(existing) = attempts
                .values()
                .find(|a| a.session_id == attempt.session_id && a.guesser_id == attempt.guesser_id)
            {
                return Err(ParleyError::conflict(
                    "an empathy attempt already exists for this guesser",
                    existing.status,
                ));
            }
            attempts.insert(attempt.id.clone(), attempt.clone());
        }
        self.persist().await
    }

    async fn update(&self, attempt: &EmpathyAttempt) -> Result<EmpathyAttempt> {
        let stored = {
            let mut attempts = self.attempts.write().await;
            let current = attempts
                .get_mut(&attempt.id)
                .ok_or_else(|| ParleyError::not_found("EmpathyAttempt", attempt.id.clone()))?;
            if current.version != attempt.version {
                return Err(version_conflict("empathy attempt", attempt.version, current.version));
            }
            let mut next = attempt.clone();
            next.version += 1;
            *current = next.clone();
            next
        };
        self.persist().await?;
        Ok(stored)
    }
}

#[async_trait]
impl ReconcilerResultRepository for MemoryStore {
    async fn find_by_id(&self, result_id: &str) -> Result<Option<ReconcilerResult>> {
        Ok(self
            .results
            .read()
            .await
            .iter()
            .find(|r| r.id == result_id)
            .cloned())
    }

    async fn find_latest(
        &self,
        session_id: &str,
        guesser_id: &str,
        subject_id: &str,
    ) -> Result<Option<ReconcilerResult>> {
        Ok(self
            .results
            .read()
            .await
            .iter()
            .rev()
            .find(|r| {
                r.session_id == session_id && r.guesser_id == guesser_id && r.subject_id == subject_id
            })
            .cloned())
    }

    async fn list_for_direction(
        &self,
        session_id: &str,
        guesser_id: &str,
        subject_id: &str,
    ) -> Result<Vec<ReconcilerResult>> {
        Ok(self
            .results
            .read()
            .await
            .iter()
            .filter(|r| {
                r.session_id == session_id && r.guesser_id == guesser_id && r.subject_id == subject_id
            })
            .cloned()
            .collect())
    }

    async fn create(&self, result: &ReconcilerResult) -> Result<()> {
        {
            let mut results = self.results.write().await;
            if results.iter().any(|r| r.id == result.id) {
                return Err(ParleyError::conflict(
                    "reconciler results are immutable",
                    "stored",
                ));
            }
            results.push(result.clone());
        }
        self.persist().await
    }
}

#[async_trait]
impl ShareOfferRepository for MemoryStore {
    async fn find_by_id(&self, offer_id: &str) -> Result<Option<ShareOffer>> {
        Ok(self
            .offers
            .read()
            .await
            .iter()
            .find(|o| o.id == offer_id)
            .cloned())
    }

    async fn list_for_direction(
        &self,
        session_id: &str,
        guesser_id: &str,
        subject_id: &str,
    ) -> Result<Vec<ShareOffer>> {
        Ok(self
            .offers
            .read()
            .await
            .iter()
            .filter(|o| {
                o.session_id == session_id && o.guesser_id == guesser_id && o.subject_id == subject_id
            })
            .cloned()
            .collect())
    }

    async fn list_for_subject(&self, session_id: &str, subject_id: &str) -> Result<Vec<ShareOffer>> {
        Ok(self
            .offers
            .read()
            .await
            .iter()
            .filter(|o| o.session_id == session_id && o.subject_id == subject_id)
            .cloned()
            .collect())
    }

    async fn create(&self, offer: &ShareOffer) -> Result<()> {
        {
            let mut offers = self.offers.write().await;
            if offers.iter().any(|o| o.id == offer.id) {
                return Err(ParleyError::conflict("share offer already exists", offer.status));
            }
            offers.push(offer.clone());
        }
        self.persist().await
    }

    async fn update(&self, offer: &ShareOffer) -> Result<ShareOffer> {
        let stored = {
            let mut offers = self.offers.write().await;
            let current = offers
                .iter_mut()
                .find(|o| o.id == offer.id)
                .ok_or_else(|| ParleyError::not_found("ShareOffer", offer.id.clone()))?;
            if current.version != offer.version {
                return Err(version_conflict("share offer", offer.version, current.version));
            }
            let mut next = offer.clone();
            next.version += 1;
            *current = next.clone();
            next
        };
        self.persist().await?;
        Ok(stored)
    }
}

#[async_trait]
impl ConsentRepository for MemoryStore {
    async fn append(&self, record: &ConsentRecord) -> Result<()> {
        self.consents.write().await.push(record.clone());
        self.persist().await
    }

    async fn list_for_user(&self, session_id: &str, user_id: &str) -> Result<Vec<ConsentRecord>> {
        Ok(self
            .consents
            .read()
            .await
            .iter()
            .filter(|c| c.session_id == session_id && c.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MessageRepository for MemoryStore {
    async fn append(&self, message: &Message) -> Result<()> {
        self.messages.write().await.push(message.clone());
        self.persist().await
    }

    async fn list_for_stage(
        &self,
        session_id: &str,
        user_id: &str,
        stage: Stage,
    ) -> Result<Vec<Message>> {
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .filter(|m| m.session_id == session_id && m.user_id == user_id && m.stage == stage)
            .cloned()
            .collect())
    }
}
