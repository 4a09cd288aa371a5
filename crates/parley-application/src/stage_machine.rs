//! Session Stage Machine.
//!
//! The operations a transport exposes to session members. Each operation
//! validates membership and session status, performs its state change and
//! then hands realtime events and transcript indexing to the background
//! executor, so a failed side effect never fails the operation itself.

use crate::locks::KeyedLocks;
use crate::progress_store::{GateChange, StageProgressStore};
use crate::reconciler::{EmpathyReconciler, ReconcileReport};
use crate::share_offer::{ShareOfferNegotiator, ShareOfferReply, SharedContextView};
use crate::views::{EmpathyExchangeView, GateStateView, OwnAttemptView, PartnerAttemptView};
use crate::Repositories;
use chrono::Utc;
use parley_core::config::ParleyConfig;
use parley_core::consent::{ConsentDecision, ConsentRecord, ConsentTarget};
use parley_core::empathy::{Direction, EmpathyAttempt, EmpathyStatus, EmpathyValidation};
use parley_core::error::StageBlocked;
use parley_core::indexer::{NoOpTranscriptIndexer, TranscriptIndexer};
use parley_core::message::Message;
use parley_core::reconciler::JudgmentCapability;
use parley_core::session::{
    NoOpEventPublisher, Session, SessionEvent, SessionEventPublisher, SessionStatus,
};
use parley_core::share::{DeliveryStatus, ShareOffer, ShareOfferStatus};
use parley_core::stage::{
    GateEvaluator, GateKey, PartnerStage, Stage, StageProgress, StageStatus,
};
use parley_core::{ParleyError, Result};
use parley_execution::{BackgroundExecutor, JobContext};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Result of a `confirm_gate` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateConfirmation {
    pub progress: StageProgress,
    /// False when the gate already had the requested value.
    pub changed: bool,
    /// Set when this call moved both members into the next stage.
    pub advanced_to: Option<Stage>,
    /// Why the caller cannot leave the stage yet, if they cannot.
    pub blocked: Option<StageBlocked>,
}

/// Result of an empathy submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmpathySubmission {
    pub attempt: OwnAttemptView,
    /// The statement went through a fresh analysis during this call.
    pub analyzed: bool,
}

/// Entry point for every session operation.
///
/// # Responsibilities
///
/// - Session lifecycle (invite, accept, pause, resume, abandon, resolve)
/// - Gate confirmation and joint stage advancement
/// - The empathy exchange: submission, reconciliation, share offers,
///   simultaneous reveal and validation
/// - Per-user read models
///
/// Advancement and reveal decisions for one session are serialized by a
/// per-session lock; gate writes are serialized per (session, user, stage)
/// by [`StageProgressStore`].
pub struct SessionStageMachine {
    repos: Repositories,
    progress: StageProgressStore,
    negotiator: Arc<ShareOfferNegotiator>,
    reconciler: EmpathyReconciler,
    publisher: Arc<dyn SessionEventPublisher>,
    indexer: Arc<dyn TranscriptIndexer>,
    executor: BackgroundExecutor,
    config: ParleyConfig,
    session_locks: KeyedLocks<String>,
}

impl SessionStageMachine {
    pub fn new(
        repos: Repositories,
        judge: Arc<dyn JudgmentCapability>,
        executor: BackgroundExecutor,
        config: ParleyConfig,
    ) -> Self {
        let negotiator = Arc::new(ShareOfferNegotiator::new(
            repos.offers.clone(),
            repos.attempts.clone(),
            repos.consents.clone(),
            config.share_offer.clone(),
        ));
        let reconciler = EmpathyReconciler::new(
            repos.attempts.clone(),
            repos.results.clone(),
            repos.messages.clone(),
            judge,
            Arc::clone(&negotiator),
            Duration::from_secs(config.reconciler.judge_timeout_secs),
        );
        let progress = StageProgressStore::new(repos.progress.clone(), config.store.max_write_retries);

        Self {
            repos,
            progress,
            negotiator,
            reconciler,
            publisher: Arc::new(NoOpEventPublisher),
            indexer: Arc::new(NoOpTranscriptIndexer),
            executor,
            config,
            session_locks: KeyedLocks::new(),
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn SessionEventPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn with_indexer(mut self, indexer: Arc<dyn TranscriptIndexer>) -> Self {
        self.indexer = indexer;
        self
    }

    pub fn executor(&self) -> &BackgroundExecutor {
        &self.executor
    }

    // ============================================================================
    // Session lifecycle
    // ============================================================================

    /// Opens a session and invites the partner.
    pub async fn create_session(
        &self,
        relationship_id: &str,
        initiator_id: &str,
        partner_id: &str,
    ) -> Result<Session> {
        let mut session = Session::new(relationship_id, initiator_id, partner_id)?;
        session.transition(SessionStatus::Invited)?;
        self.repos.sessions.create(&session).await?;

        let turn_id = new_turn_id();
        tracing::info!(
            target: "stage_machine",
            session_id = %session.id,
            turn_id = %turn_id,
            "session created"
        );
        self.publish_status(&session, &turn_id);
        Ok(session)
    }

    /// The invited partner joins; the session becomes `ACTIVE`.
    pub async fn accept_invitation(&self, session_id: &str, user_id: &str) -> Result<Session> {
        self.member_session(session_id, user_id).await?;
        self.change_status(session_id, SessionStatus::Active, |session| {
            if session.partner_id != user_id {
                return Err(ParleyError::conflict(
                    "only the invited partner can accept the invitation",
                    session.status,
                ));
            }
            Ok(())
        })
        .await
    }

    pub async fn pause_session(&self, session_id: &str, user_id: &str) -> Result<Session> {
        self.member_session(session_id, user_id).await?;
        self.change_status(session_id, SessionStatus::Paused, |_| Ok(()))
            .await
    }

    /// Resumes a paused session as `ACTIVE` or `WAITING`, whichever the
    /// members' progress implies.
    pub async fn resume_session(&self, session_id: &str, user_id: &str) -> Result<Session> {
        self.member_session(session_id, user_id).await?;
        self.change_status(session_id, SessionStatus::Active, |session| {
            if session.status != SessionStatus::Paused {
                return Err(ParleyError::conflict(
                    "only a paused session can be resumed",
                    session.status,
                ));
            }
            Ok(())
        })
        .await?;
        self.refresh_session_status(session_id, &new_turn_id()).await?;
        self.member_session(session_id, user_id).await
    }

    pub async fn abandon_session(&self, session_id: &str, user_id: &str) -> Result<Session> {
        self.member_session(session_id, user_id).await?;
        self.change_status(session_id, SessionStatus::Abandoned, |_| Ok(()))
            .await
    }

    /// Closes the session once both members completed the final stage.
    pub async fn resolve_session(&self, session_id: &str, user_id: &str) -> Result<Session> {
        let session = self.member_session(session_id, user_id).await?;
        let partner_id = partner_of(&session, user_id)?;

        let last = Stage::StrategicRepair;
        let partner = self
            .progress
            .find(session_id, &partner_id, last)
            .await?
            .map(|p| p.partner_view());
        match self.progress.find(session_id, user_id, last).await? {
            Some(own) => GateEvaluator::can_advance(&own, partner)?,
            None => {
                return Err(ParleyError::from(StageBlocked {
                    stage: last,
                    unsatisfied_gates: last.required_gates().to_vec(),
                    partner_completed: partner.is_some_and(|p| p.status == StageStatus::Completed),
                }));
            }
        }

        self.change_status(session_id, SessionStatus::Resolved, |_| Ok(()))
            .await
    }

    // ============================================================================
    // Gates and advancement
    // ============================================================================

    /// Sets or clears one gate of the caller's own progress in `stage`.
    ///
    /// Stage 0 progress is created on first use; any later stage must have
    /// been entered through joint advancement. Gates of the empathy exchange
    /// are rejected here.
    pub async fn confirm_gate(
        &self,
        session_id: &str,
        user_id: &str,
        stage: Stage,
        key: &str,
        value: bool,
    ) -> Result<GateConfirmation> {
        let session = self.member_session(session_id, user_id).await?;
        ensure_accepts_stage_actions(&session)?;
        let partner_id = partner_of(&session, user_id)?;

        let key = GateKey::parse_for(stage, key)?;
        if key.is_exchange_managed() {
            return Err(ParleyError::validation(format!(
                "gate '{key}' is set by the empathy exchange"
            )));
        }
        self.ensure_entered(session_id, user_id, &partner_id, stage)
            .await?;

        let turn_id = new_turn_id();
        let change = self
            .progress
            .upsert_gate(
                session_id,
                user_id,
                stage,
                key,
                value,
                stage == Stage::Onboarding,
            )
            .await?;
        self.publish_gate_change(&session, &change, &turn_id);

        let advanced_to = if change.progress.is_completed() {
            self.try_advance(&session, stage, &turn_id).await?
        } else {
            None
        };
        self.refresh_session_status(session_id, &turn_id).await?;

        let blocked = if advanced_to.is_none() {
            let partner = self.partner_stage(session_id, &partner_id).await?;
            GateEvaluator::can_advance(&change.progress, partner).err()
        } else {
            None
        };

        Ok(GateConfirmation {
            progress: change.progress,
            changed: change.changed,
            advanced_to,
            blocked,
        })
    }

    /// The caller's gate state: their own rows in full, the partner's stage
    /// and status only.
    pub async fn get_gate_state(&self, session_id: &str, user_id: &str) -> Result<GateStateView> {
        let session = self.member_session(session_id, user_id).await?;
        let partner_id = partner_of(&session, user_id)?;

        let mut history = self.progress.list(session_id, user_id).await?;
        let current = history.pop();
        let partner = self.partner_stage(session_id, &partner_id).await?;
        let evaluation = current.as_ref().map(|c| GateEvaluator::evaluate(&c.gates));
        let blocked = current
            .as_ref()
            .and_then(|c| GateEvaluator::can_advance(c, partner).err());

        Ok(GateStateView {
            session_id: session.id,
            user_id: user_id.to_string(),
            session_status: session.status,
            current,
            evaluation,
            history,
            partner,
            blocked,
        })
    }

    // ============================================================================
    // Messages
    // ============================================================================

    /// Records a message in the caller's current stage.
    pub async fn send_message(
        &self,
        session_id: &str,
        user_id: &str,
        content: &str,
    ) -> Result<Message> {
        let session = self.member_session(session_id, user_id).await?;
        ensure_accepts_stage_actions(&session)?;
        let content = content.trim();
        if content.is_empty() {
            return Err(ParleyError::validation("message content is empty"));
        }

        let stage = match self.progress.find_latest(session_id, user_id).await? {
            Some(current) => current.stage,
            None => {
                self.progress
                    .ensure(session_id, user_id, Stage::Onboarding)
                    .await?;
                Stage::Onboarding
            }
        };

        let message = Message::new(session_id, user_id, stage, content);
        self.repos.messages.append(&message).await?;

        let turn_id = new_turn_id();
        self.publish(
            session_id,
            &turn_id,
            SessionEvent::MessageRecorded {
                user_id: user_id.to_string(),
                stage,
            },
        );
        let indexer = Arc::clone(&self.indexer);
        let indexed = message.clone();
        self.executor.submit(
            "transcript.index",
            JobContext::new(session_id, &turn_id),
            async move { indexer.index(&indexed).await },
        );
        Ok(message)
    }

    // ============================================================================
    // Empathy exchange
    // ============================================================================

    /// Submits or re-submits the caller's statement about their partner.
    ///
    /// Requires the caller to have confirmed feeling heard. Once both
    /// statements exist the reconciler runs for this direction (and for the
    /// partner's, if it was still held), followed by the reveal check.
    pub async fn submit_empathy_attempt(
        &self,
        session_id: &str,
        guesser_id: &str,
        content: &str,
    ) -> Result<EmpathySubmission> {
        let session = self.member_session(session_id, guesser_id).await?;
        ensure_accepts_stage_actions(&session)?;
        let subject_id = partner_of(&session, guesser_id)?;
        let content = self.validate_statement(content)?;
        self.ensure_witnessed(session_id, guesser_id, &subject_id)
            .await?;

        let direction = Direction::new(guesser_id, subject_id.as_str());
        let turn_id = new_turn_id();

        let attempt = match self
            .repos
            .attempts
            .find_by_guesser(session_id, guesser_id)
            .await?
        {
            Some(mut attempt) => {
                if !attempt.status.accepts_resubmission() {
                    return Err(ParleyError::conflict(
                        "empathy attempt is locked for re-submission",
                        attempt.status,
                    ));
                }
                attempt.resubmit(&content)?;
                let attempt = self.repos.attempts.update(&attempt).await?;
                self.negotiator
                    .supersede_direction(session_id, &direction)
                    .await?;
                attempt
            }
            None => {
                let attempt = EmpathyAttempt::new(session_id, &direction, &content);
                self.repos.attempts.create(&attempt).await?;
                self.repos
                    .consents
                    .append(&ConsentRecord::new(
                        session_id,
                        guesser_id,
                        ConsentTarget::EmpathyAttempt,
                        &attempt.id,
                        ConsentDecision::Granted,
                    ))
                    .await?;
                attempt
            }
        };

        tracing::info!(
            target: "stage_machine",
            session_id,
            turn_id = %turn_id,
            direction = %direction,
            revision = attempt.revision_count,
            "empathy attempt submitted"
        );
        self.publish(
            session_id,
            &turn_id,
            SessionEvent::EmpathyStatusChanged {
                guesser_id: guesser_id.to_string(),
                status: attempt.status,
                revision: attempt.revision_count,
            },
        );

        if self
            .progress
            .find(session_id, guesser_id, Stage::Perspective)
            .await?
            .is_some()
        {
            let change = self
                .progress
                .upsert_gates(session_id, guesser_id, Stage::Perspective, &EXCHANGE_DRAFT, false)
                .await?;
            self.publish_gate_change(&session, &change, &turn_id);
        }

        let mut analyzed = false;
        if let Some(partner_attempt) = self
            .repos
            .attempts
            .find_by_guesser(session_id, &subject_id)
            .await?
        {
            let report = self.reconcile(&session, &direction, &turn_id).await?;
            analyzed = report.outcome.judged();
            if partner_attempt.status == EmpathyStatus::Held {
                self.reconcile(&session, &direction.reversed(), &turn_id)
                    .await?;
            }
            self.try_reveal(&session, &turn_id).await?;
        }

        let attempt = self
            .repos
            .attempts
            .find_by_id(&attempt.id)
            .await?
            .ok_or_else(|| ParleyError::not_found("EmpathyAttempt", &attempt.id))?;
        Ok(EmpathySubmission {
            attempt: OwnAttemptView::from(&attempt),
            analyzed,
        })
    }

    /// Runs the reconciler for one direction on demand, then checks whether
    /// both statements can be revealed.
    pub async fn run_reconciler(
        &self,
        session_id: &str,
        direction: &Direction,
    ) -> Result<ReconcileReport> {
        let session = self
            .member_session(session_id, &direction.guesser_id)
            .await?;
        if session.partner_of(&direction.guesser_id) != Some(direction.subject_id.as_str()) {
            return Err(ParleyError::not_found("Session", session_id));
        }
        ensure_accepts_stage_actions(&session)?;

        let turn_id = new_turn_id();
        let mut report = self.reconcile(&session, direction, &turn_id).await?;
        if !self.try_reveal(&session, &turn_id).await?.is_empty() {
            if let Some(attempt) = self.repos.attempts.find_by_id(&report.attempt.id).await? {
                report.attempt = attempt;
            }
        }
        Ok(report)
    }

    /// The subject's open share offer, if any. Fetching it marks it offered.
    pub async fn get_share_offer(
        &self,
        session_id: &str,
        subject_id: &str,
    ) -> Result<Option<ShareOffer>> {
        self.member_session(session_id, subject_id).await?;
        self.negotiator.get_offer(session_id, subject_id).await
    }

    /// Answers a share offer. Declining or skipping has no other effect on
    /// the exchange than unblocking the guesser's statement.
    pub async fn respond_to_share_offer(
        &self,
        offer_id: &str,
        subject_id: &str,
        reply: ShareOfferReply,
    ) -> Result<ShareOffer> {
        let offer = self
            .negotiator
            .find_for_subject(offer_id, subject_id)
            .await?;
        let session = self
            .member_session(&offer.session_id, subject_id)
            .await?;
        ensure_accepts_stage_actions(&session)?;

        let turn_id = new_turn_id();
        let outcome = self.negotiator.respond(offer_id, subject_id, reply).await?;
        if let Some(attempt) = &outcome.attempt {
            self.publish(
                &session.id,
                &turn_id,
                SessionEvent::EmpathyStatusChanged {
                    guesser_id: attempt.guesser_id.clone(),
                    status: attempt.status,
                    revision: attempt.revision_count,
                },
            );
        }
        if outcome.offer.status == ShareOfferStatus::Accepted {
            self.publish(
                &session.id,
                &turn_id,
                SessionEvent::SharedContextAvailable {
                    guesser_id: outcome.offer.guesser_id.clone(),
                    offer_id: outcome.offer.id.clone(),
                },
            );
        }

        self.try_reveal(&session, &turn_id).await?;
        Ok(outcome.offer)
    }

    /// Accepted context shared with the caller as guesser.
    pub async fn get_shared_context(
        &self,
        session_id: &str,
        guesser_id: &str,
    ) -> Result<Vec<SharedContextView>> {
        let session = self.member_session(session_id, guesser_id).await?;
        let subject_id = partner_of(&session, guesser_id)?;
        self.negotiator
            .shared_context_for(session_id, &Direction::new(guesser_id, subject_id))
            .await
    }

    pub async fn mark_shared_context_seen(
        &self,
        session_id: &str,
        guesser_id: &str,
        offer_id: &str,
    ) -> Result<ShareOffer> {
        self.member_session(session_id, guesser_id).await?;
        self.negotiator
            .mark_seen(session_id, guesser_id, offer_id)
            .await
    }

    /// The exchange as the caller sees it. The partner's statement carries
    /// content only once revealed.
    pub async fn get_empathy_exchange_status(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<EmpathyExchangeView> {
        let session = self.member_session(session_id, user_id).await?;
        let partner_id = partner_of(&session, user_id)?;

        let own = self
            .repos
            .attempts
            .find_by_guesser(session_id, user_id)
            .await?;
        let partner = self
            .repos
            .attempts
            .find_by_guesser(session_id, &partner_id)
            .await?;
        let stage = self
            .progress
            .find_latest(session_id, user_id)
            .await?
            .map(|p| p.stage);
        let share_offer_pending = self
            .negotiator
            .peek_offer(session_id, user_id)
            .await?
            .is_some();
        let unseen_shared_context = self
            .repos
            .offers
            .list_for_direction(session_id, user_id, &partner_id)
            .await?
            .iter()
            .filter(|o| {
                o.status == ShareOfferStatus::Accepted
                    && matches!(
                        o.delivery_status,
                        Some(DeliveryStatus::Pending | DeliveryStatus::Delivered)
                    )
            })
            .count();

        Ok(EmpathyExchangeView {
            session_id: session.id,
            user_id: user_id.to_string(),
            stage,
            own: own.as_ref().map(OwnAttemptView::from),
            partner: partner.as_ref().map(PartnerAttemptView::from),
            share_offer_pending,
            unseen_shared_context,
        })
    }

    /// The subject's verdict on the partner's revealed statement. An accurate
    /// verdict satisfies the subject's `partnerValidated` gate.
    pub async fn validate_empathy(
        &self,
        session_id: &str,
        subject_id: &str,
        accurate: bool,
        feedback: Option<&str>,
    ) -> Result<EmpathyAttempt> {
        let session = self.member_session(session_id, subject_id).await?;
        ensure_accepts_stage_actions(&session)?;
        let guesser_id = partner_of(&session, subject_id)?;

        let mut attempt = self
            .repos
            .attempts
            .find_by_guesser(session_id, &guesser_id)
            .await?
            .ok_or_else(|| ParleyError::not_found("EmpathyAttempt", &guesser_id))?;
        if attempt.status != EmpathyStatus::Revealed {
            return Err(ParleyError::conflict(
                "only a revealed statement can be validated",
                attempt.status,
            ));
        }
        attempt.transition(EmpathyStatus::Validated)?;
        attempt.validation = Some(EmpathyValidation {
            accurate,
            feedback: feedback
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_string),
            revision: attempt.revision_count,
            validated_at: Utc::now(),
        });
        let attempt = self.repos.attempts.update(&attempt).await?;

        let turn_id = new_turn_id();
        tracing::info!(
            target: "stage_machine",
            session_id,
            turn_id = %turn_id,
            guesser_id = %guesser_id,
            accurate,
            "empathy validated"
        );
        self.publish(
            session_id,
            &turn_id,
            SessionEvent::EmpathyValidated {
                guesser_id: guesser_id.clone(),
                accurate,
            },
        );

        if accurate {
            let change = self
                .progress
                .upsert_gate(
                    session_id,
                    subject_id,
                    Stage::Perspective,
                    GateKey::PartnerValidated,
                    true,
                    false,
                )
                .await?;
            self.publish_gate_change(&session, &change, &turn_id);
            if change.progress.is_completed() {
                self.try_advance(&session, Stage::Perspective, &turn_id)
                    .await?;
            }
            self.refresh_session_status(session_id, &turn_id).await?;
        }
        Ok(attempt)
    }

    /// Consent decisions the caller has recorded in this session.
    pub async fn list_consents(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<Vec<ConsentRecord>> {
        self.member_session(session_id, user_id).await?;
        self.repos.consents.list_for_user(session_id, user_id).await
    }

    // ============================================================================
    // Internals
    // ============================================================================

    /// Loads a session the caller belongs to. Non-members see `NotFound`.
    async fn member_session(&self, session_id: &str, user_id: &str) -> Result<Session> {
        self.repos
            .sessions
            .find_by_id(session_id)
            .await?
            .filter(|s| s.is_member(user_id))
            .ok_or_else(|| ParleyError::not_found("Session", session_id))
    }

    async fn partner_stage(
        &self,
        session_id: &str,
        partner_id: &str,
    ) -> Result<Option<PartnerStage>> {
        Ok(self
            .progress
            .find_latest(session_id, partner_id)
            .await?
            .map(|p| p.partner_view()))
    }

    /// Applies a lifecycle change to the freshest copy of the session,
    /// serialized with every other status write of the session.
    async fn change_status<F>(
        &self,
        session_id: &str,
        to: SessionStatus,
        precondition: F,
    ) -> Result<Session>
    where
        F: FnOnce(&Session) -> Result<()>,
    {
        let _guard = self.session_locks.acquire(&session_id.to_string()).await;

        let mut session = self
            .repos
            .sessions
            .find_by_id(session_id)
            .await?
            .ok_or_else(|| ParleyError::not_found("Session", session_id))?;
        precondition(&session)?;
        if session.status == to {
            return Ok(session);
        }
        session.transition(to)?;
        let session = self.repos.sessions.update(&session).await?;

        let turn_id = new_turn_id();
        tracing::info!(
            target: "stage_machine",
            session_id = %session.id,
            turn_id = %turn_id,
            status = %to,
            "session status changed"
        );
        self.publish_status(&session, &turn_id);
        Ok(session)
    }

    /// Fails with `StageBlocked` when the caller has not entered `stage`,
    /// naming what holds them in the stage before it.
    async fn ensure_entered(
        &self,
        session_id: &str,
        user_id: &str,
        partner_id: &str,
        stage: Stage,
    ) -> Result<()> {
        if stage == Stage::Onboarding
            || self.progress.find(session_id, user_id, stage).await?.is_some()
        {
            return Ok(());
        }

        let partner = self.partner_stage(session_id, partner_id).await?;
        let blocked = match self.progress.find_latest(session_id, user_id).await? {
            Some(current) => match GateEvaluator::can_advance(&current, partner) {
                Err(blocked) => blocked,
                // Both completed but the next row is not there yet.
                Ok(()) => StageBlocked {
                    stage: current.stage,
                    unsatisfied_gates: Vec::new(),
                    partner_completed: true,
                },
            },
            None => StageBlocked {
                stage: Stage::Onboarding,
                unsatisfied_gates: Stage::Onboarding.required_gates().to_vec(),
                partner_completed: partner.is_some_and(|p| {
                    p.stage > Stage::Onboarding || p.status == StageStatus::Completed
                }),
            },
        };
        Err(blocked.into())
    }

    async fn ensure_witnessed(
        &self,
        session_id: &str,
        guesser_id: &str,
        subject_id: &str,
    ) -> Result<()> {
        let witnessed = self
            .progress
            .find(session_id, guesser_id, Stage::Witness)
            .await?
            .is_some_and(|w| w.gates.is_set(GateKey::FeelHeardConfirmed));
        if witnessed {
            if let Some(current) = self.progress.find_latest(session_id, guesser_id).await? {
                if current.stage > Stage::Perspective {
                    return Err(ParleyError::conflict(
                        "the empathy exchange is closed",
                        current.stage,
                    ));
                }
            }
            return Ok(());
        }

        let partner_completed = self
            .progress
            .find(session_id, subject_id, Stage::Witness)
            .await?
            .is_some_and(|w| w.is_completed());
        Err(ParleyError::from(StageBlocked {
            stage: Stage::Witness,
            unsatisfied_gates: vec![GateKey::FeelHeardConfirmed],
            partner_completed,
        }))
    }

    fn validate_statement(&self, content: &str) -> Result<String> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ParleyError::validation("empathy statement is empty"));
        }
        let max = self.config.empathy.max_content_chars;
        if content.chars().count() > max {
            return Err(ParleyError::validation(format!(
                "empathy statement exceeds {max} characters"
            )));
        }
        Ok(content.to_string())
    }

    /// Moves both members past `stage` when both completed it. Returns the
    /// stage entered, or `None` if nothing moved.
    async fn try_advance(
        &self,
        session: &Session,
        stage: Stage,
        turn_id: &str,
    ) -> Result<Option<Stage>> {
        let _guard = self.session_locks.acquire(&session.id).await;

        let Some(next) = stage.next() else {
            return Ok(None);
        };
        for member in session.members() {
            let completed = self
                .progress
                .find(&session.id, member, stage)
                .await?
                .is_some_and(|p| p.is_completed());
            if !completed {
                return Ok(None);
            }
        }

        let mut entered = false;
        for member in session.members() {
            let (_, created) = self.progress.ensure(&session.id, member, next).await?;
            entered |= created;
        }
        if !entered {
            return Ok(None);
        }

        if next == Stage::Perspective {
            self.seed_exchange_gates(session, turn_id).await?;
        }

        tracing::info!(
            target: "stage_machine",
            session_id = %session.id,
            turn_id,
            stage = next.ordinal(),
            "stage advanced"
        );
        self.publish(
            &session.id,
            turn_id,
            SessionEvent::StageAdvanced { stage: next },
        );
        Ok(Some(next))
    }

    /// Carries a statement submitted before its author entered the
    /// perspective stage over to the freshly created row.
    async fn seed_exchange_gates(&self, session: &Session, turn_id: &str) -> Result<()> {
        for member in session.members() {
            if self
                .repos
                .attempts
                .find_by_guesser(&session.id, member)
                .await?
                .is_none()
            {
                continue;
            }
            let change = self
                .progress
                .upsert_gates(&session.id, member, Stage::Perspective, &EXCHANGE_DRAFT, false)
                .await?;
            self.publish_gate_change(session, &change, turn_id);
        }
        Ok(())
    }

    /// Reveals both statements together once neither is still in analysis
    /// or awaiting a share decision. Returns the guessers revealed now.
    async fn try_reveal(&self, session: &Session, turn_id: &str) -> Result<Vec<String>> {
        let _guard = self.session_locks.acquire(&session.id).await;

        let mut attempts = Vec::with_capacity(2);
        for member in session.members() {
            match self
                .repos
                .attempts
                .find_by_guesser(&session.id, member)
                .await?
            {
                Some(attempt) if attempt.status.is_reveal_eligible() => attempts.push(attempt),
                _ => return Ok(Vec::new()),
            }
        }

        let now = Utc::now();
        let mut revealed = Vec::new();
        for mut attempt in attempts {
            if attempt.status != EmpathyStatus::Ready {
                continue;
            }
            attempt.transition(EmpathyStatus::Revealed)?;
            attempt.revealed_at = Some(now);
            let attempt = self.repos.attempts.update(&attempt).await?;
            revealed.push(attempt.guesser_id);
        }

        if !revealed.is_empty() {
            tracing::info!(
                target: "stage_machine",
                session_id = %session.id,
                turn_id,
                revealed = revealed.len(),
                "empathy statements revealed"
            );
            self.publish(
                &session.id,
                turn_id,
                SessionEvent::EmpathyRevealed {
                    guesser_ids: revealed.clone(),
                },
            );
        }
        Ok(revealed)
    }

    async fn reconcile(
        &self,
        session: &Session,
        direction: &Direction,
        turn_id: &str,
    ) -> Result<ReconcileReport> {
        let report = self.reconciler.run(&session.id, direction, turn_id).await?;
        if report.outcome.judged() {
            self.publish(
                &session.id,
                turn_id,
                SessionEvent::EmpathyStatusChanged {
                    guesser_id: report.attempt.guesser_id.clone(),
                    status: report.attempt.status,
                    revision: report.attempt.revision_count,
                },
            );
        }
        if let Some(offer) = &report.offer {
            self.publish(
                &session.id,
                turn_id,
                SessionEvent::ShareOfferAvailable {
                    subject_id: offer.subject_id.clone(),
                    offer_id: offer.id.clone(),
                },
            );
        }
        Ok(report)
    }

    /// Keeps `ACTIVE`/`WAITING` in line with progress: `WAITING` while
    /// exactly one member has completed the shared current stage.
    async fn refresh_session_status(&self, session_id: &str, turn_id: &str) -> Result<()> {
        let _guard = self.session_locks.acquire(&session_id.to_string()).await;

        let Some(mut session) = self.repos.sessions.find_by_id(session_id).await? else {
            return Err(ParleyError::not_found("Session", session_id));
        };
        if !matches!(
            session.status,
            SessionStatus::Active | SessionStatus::Waiting
        ) {
            return Ok(());
        }

        let [first, second] = session.members();
        let first = self.progress.find_latest(session_id, first).await?;
        let second = self.progress.find_latest(session_id, second).await?;
        let waiting = match (&first, &second) {
            (Some(a), Some(b)) => a.stage == b.stage && a.is_completed() != b.is_completed(),
            (Some(only), None) | (None, Some(only)) => only.is_completed(),
            (None, None) => false,
        };

        let target = if waiting {
            SessionStatus::Waiting
        } else {
            SessionStatus::Active
        };
        if target != session.status {
            session.transition(target)?;
            let session = self.repos.sessions.update(&session).await?;
            tracing::debug!(
                target: "stage_machine",
                session_id,
                turn_id,
                status = %target,
                "session status refreshed"
            );
            self.publish_status(&session, turn_id);
        }
        Ok(())
    }

    fn publish_status(&self, session: &Session, turn_id: &str) {
        self.publish(
            &session.id,
            turn_id,
            SessionEvent::SessionStatusChanged {
                status: session.status,
            },
        );
    }

    fn publish_gate_change(&self, session: &Session, change: &GateChange, turn_id: &str) {
        if !change.changed {
            return;
        }
        self.publish(
            &session.id,
            turn_id,
            SessionEvent::GateUpdated {
                user_id: change.progress.user_id.clone(),
                stage: change.progress.stage,
                status: change.progress.status,
            },
        );
    }

    /// Hands an event to the publisher as a detached job.
    fn publish(&self, session_id: &str, turn_id: &str, event: SessionEvent) {
        let publisher = Arc::clone(&self.publisher);
        let target = session_id.to_string();
        self.executor.submit(
            event.name(),
            JobContext::new(session_id, turn_id),
            async move { publisher.publish(&target, &event).await },
        );
    }
}

/// Gates a submitted statement satisfies in the perspective stage.
const EXCHANGE_DRAFT: [(GateKey, bool); 2] = [
    (GateKey::EmpathyDraftReady, true),
    (GateKey::EmpathyConsented, true),
];

fn new_turn_id() -> String {
    Uuid::new_v4().to_string()
}

fn partner_of(session: &Session, user_id: &str) -> Result<String> {
    session
        .partner_of(user_id)
        .map(str::to_string)
        .ok_or_else(|| ParleyError::not_found("Session", &session.id))
}

fn ensure_accepts_stage_actions(session: &Session) -> Result<()> {
    if session.status.accepts_stage_actions() {
        Ok(())
    } else {
        Err(ParleyError::conflict(
            "session does not accept stage actions",
            session.status,
        ))
    }
}
