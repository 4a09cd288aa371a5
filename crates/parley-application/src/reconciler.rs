//! Empathy Reconciler.
//!
//! Orchestrates one analysis of a direction: compares the guesser's current
//! statement against what the subject expressed while being witnessed,
//! stores the result and hands gaps to the share-offer negotiator. The
//! judgment itself is delegated to a [`JudgmentCapability`].
//!
//! The attempt's `ANALYZING` status is the only lock held across the
//! judgment call; it is claimed with an optimistic version check so two
//! concurrent runs cannot both reach the judge.

use crate::share_offer::ShareOfferNegotiator;
use parley_core::empathy::{Direction, EmpathyAttempt, EmpathyAttemptRepository, EmpathyStatus};
use parley_core::fingerprint::{content_fingerprint, joined_fingerprint};
use parley_core::message::MessageRepository;
use parley_core::reconciler::{
    JudgmentCapability, JudgmentContext, JudgmentError, JudgmentRequest,
    ReconcilerInputs, ReconcilerResult, ReconcilerResultRepository, Recommendation, ShareAction,
};
use parley_core::share::ShareOffer;
use parley_core::stage::Stage;
use parley_core::{ParleyError, Result};
use std::sync::Arc;
use std::time::Duration;

/// How a run ended.
#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    /// The judgment capability was consulted (or its fallback used).
    Computed(ReconcilerResult),
    /// Inputs were unchanged; the stored result was returned as-is.
    Reused(ReconcilerResult),
    /// Another run holds the attempt; carries the last known result.
    InFlight(Option<ReconcilerResult>),
}

impl ReconcileOutcome {
    pub fn result(&self) -> Option<&ReconcilerResult> {
        match self {
            Self::Computed(result) | Self::Reused(result) => Some(result),
            Self::InFlight(result) => result.as_ref(),
        }
    }

    pub fn judged(&self) -> bool {
        matches!(self, Self::Computed(_))
    }
}

#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub outcome: ReconcileOutcome,
    /// The guesser's attempt after the run.
    pub attempt: EmpathyAttempt,
    /// Offer created by this run, if any.
    pub offer: Option<ShareOffer>,
}

pub struct EmpathyReconciler {
    attempts: Arc<dyn EmpathyAttemptRepository>,
    results: Arc<dyn ReconcilerResultRepository>,
    messages: Arc<dyn MessageRepository>,
    judge: Arc<dyn JudgmentCapability>,
    negotiator: Arc<ShareOfferNegotiator>,
    judge_timeout: Duration,
}

impl EmpathyReconciler {
    pub fn new(
        attempts: Arc<dyn EmpathyAttemptRepository>,
        results: Arc<dyn ReconcilerResultRepository>,
        messages: Arc<dyn MessageRepository>,
        judge: Arc<dyn JudgmentCapability>,
        negotiator: Arc<ShareOfferNegotiator>,
        judge_timeout: Duration,
    ) -> Self {
        Self {
            attempts,
            results,
            messages,
            judge,
            negotiator,
            judge_timeout,
        }
    }

    /// Runs the reconciler for one direction.
    ///
    /// Requires both partners to have submitted an attempt. Unchanged inputs
    /// reuse the stored result without consulting the judge.
    pub async fn run(
        &self,
        session_id: &str,
        direction: &Direction,
        turn_id: &str,
    ) -> Result<ReconcileReport> {
        let attempt = self.load_attempt(session_id, &direction.guesser_id).await?;
        if self
            .attempts
            .find_by_guesser(session_id, &direction.subject_id)
            .await?
            .is_none()
        {
            return Err(ParleyError::conflict(
                "the partner has not submitted an empathy attempt yet",
                attempt.status,
            ));
        }

        let latest = self
            .results
            .find_latest(session_id, &direction.guesser_id, &direction.subject_id)
            .await?;

        if attempt.status == EmpathyStatus::Analyzing {
            return Ok(in_flight(attempt, latest));
        }

        let inputs = self.inputs(&attempt).await?;
        if let Some(previous) = latest.filter(|r| r.matches_inputs(&inputs)) {
            tracing::debug!(
                target: "reconciler",
                session_id,
                direction = %direction,
                result_id = %previous.id,
                "inputs unchanged, reusing result"
            );
            if attempt.analyzed {
                return Ok(ReconcileReport {
                    outcome: ReconcileOutcome::Reused(previous),
                    attempt,
                    offer: None,
                });
            }
            return self.apply_stored(attempt, previous).await;
        }

        if attempt.status == EmpathyStatus::AwaitingSharing {
            return Err(ParleyError::conflict(
                "the subject has not answered the share offer yet",
                attempt.status,
            ));
        }

        let previous_status = attempt.status;
        let claimed = match self.claim(attempt).await? {
            Ok(claimed) => claimed,
            Err(report) => return Ok(report),
        };

        match self.analyze(claimed, &inputs, turn_id).await {
            Ok(report) => Ok(report),
            Err(err) => {
                self.release(session_id, &direction.guesser_id, previous_status)
                    .await;
                Err(err)
            }
        }
    }

    async fn load_attempt(&self, session_id: &str, guesser_id: &str) -> Result<EmpathyAttempt> {
        self.attempts
            .find_by_guesser(session_id, guesser_id)
            .await?
            .ok_or_else(|| ParleyError::not_found("EmpathyAttempt", format!("{session_id}/{guesser_id}")))
    }

    async fn inputs(&self, attempt: &EmpathyAttempt) -> Result<ReconcilerInputs> {
        let witnessed = self
            .messages
            .list_for_stage(&attempt.session_id, &attempt.subject_id, Stage::Witness)
            .await?;

        Ok(ReconcilerInputs {
            session_id: attempt.session_id.clone(),
            guesser_id: attempt.guesser_id.clone(),
            subject_id: attempt.subject_id.clone(),
            attempt_id: attempt.id.clone(),
            attempt_revision: attempt.revision_count,
            guess_fingerprint: content_fingerprint(&attempt.content),
            actual_fingerprint: joined_fingerprint(witnessed.iter().map(|m| m.content.as_str())),
        })
    }

    /// Moves the attempt to `ANALYZING`. A lost version race means another
    /// run got there first; that run's eventual state is reported instead.
    async fn claim(
        &self,
        mut attempt: EmpathyAttempt,
    ) -> Result<std::result::Result<EmpathyAttempt, ReconcileReport>> {
        let session_id = attempt.session_id.clone();
        let guesser_id = attempt.guesser_id.clone();
        attempt.transition(EmpathyStatus::Analyzing)?;

        match self.attempts.update(&attempt).await {
            Ok(claimed) => Ok(Ok(claimed)),
            Err(err) if err.is_conflict() => {
                let current = self.load_attempt(&session_id, &guesser_id).await?;
                if current.status != EmpathyStatus::Analyzing {
                    return Err(err);
                }
                let latest = self
                    .results
                    .find_latest(&session_id, &current.guesser_id, &current.subject_id)
                    .await?;
                Ok(Err(in_flight(current, latest)))
            }
            Err(err) => Err(err),
        }
    }

    async fn analyze(
        &self,
        attempt: EmpathyAttempt,
        inputs: &ReconcilerInputs,
        turn_id: &str,
    ) -> Result<ReconcileReport> {
        let direction = attempt.direction();
        let context = JudgmentContext {
            session_id: attempt.session_id.clone(),
            turn_id: turn_id.to_string(),
            guesser_id: direction.guesser_id.clone(),
            subject_id: direction.subject_id.clone(),
            attempt_revision: attempt.revision_count,
        };

        let result = self.judge_or_fallback(&attempt, inputs, &context).await?;
        self.negotiator
            .supersede_direction(&attempt.session_id, &direction)
            .await?;
        self.results.create(&result).await?;

        let (attempt, offer) = self.settle(attempt, &result).await?;

        tracing::info!(
            target: "reconciler",
            session_id = %context.session_id,
            turn_id = %context.turn_id,
            direction = %direction,
            revision = attempt.revision_count,
            score = result.alignment.score,
            severity = %result.gaps.severity,
            action = %result.recommendation.action,
            degraded = result.degraded,
            "reconciliation complete"
        );

        Ok(ReconcileReport {
            outcome: ReconcileOutcome::Computed(result),
            attempt,
            offer,
        })
    }

    /// Moves a claimed attempt to the state `result` implies, creating the
    /// result's offer if it has none yet.
    async fn settle(
        &self,
        mut attempt: EmpathyAttempt,
        result: &ReconcilerResult,
    ) -> Result<(EmpathyAttempt, Option<ShareOffer>)> {
        let offer = if result.recommendation.action == ShareAction::Proceed {
            None
        } else {
            Some(self.negotiator.offer_for_result(result).await?)
        };

        attempt.analyzed = true;
        attempt.transition(if offer.is_some() {
            EmpathyStatus::AwaitingSharing
        } else {
            EmpathyStatus::Ready
        })?;
        let attempt = self.attempts.update(&attempt).await?;
        Ok((attempt, offer))
    }

    /// A stored result matches the inputs but the attempt never took its
    /// outcome (the run that computed it failed after persisting it).
    async fn apply_stored(
        &self,
        attempt: EmpathyAttempt,
        result: ReconcilerResult,
    ) -> Result<ReconcileReport> {
        let session_id = attempt.session_id.clone();
        let guesser_id = attempt.guesser_id.clone();
        let previous_status = attempt.status;
        let claimed = match self.claim(attempt).await? {
            Ok(claimed) => claimed,
            Err(report) => return Ok(report),
        };

        match self.settle(claimed, &result).await {
            Ok((attempt, offer)) => {
                tracing::info!(
                    target: "reconciler",
                    session_id = %session_id,
                    guesser_id = %guesser_id,
                    result_id = %result.id,
                    status = %attempt.status,
                    "stored result applied"
                );
                Ok(ReconcileReport {
                    outcome: ReconcileOutcome::Reused(result),
                    attempt,
                    offer,
                })
            }
            Err(err) => {
                self.release(&session_id, &guesser_id, previous_status).await;
                Err(err)
            }
        }
    }

    async fn judge_or_fallback(
        &self,
        attempt: &EmpathyAttempt,
        inputs: &ReconcilerInputs,
        context: &JudgmentContext,
    ) -> Result<ReconcilerResult> {
        let witnessed = self
            .messages
            .list_for_stage(&attempt.session_id, &attempt.subject_id, Stage::Witness)
            .await?;
        let request = JudgmentRequest {
            guess: attempt.content.clone(),
            actual: witnessed
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        };

        let call = self.judge.judge(context, &request);
        let judged = match tokio::time::timeout(self.judge_timeout, call).await {
            Ok(outcome) => outcome,
            Err(_) => Err(JudgmentError::Timeout(self.judge_timeout.as_secs())),
        };

        match judged {
            Ok(judgment) => {
                let action =
                    ShareAction::classify(judgment.gaps.severity, judgment.sharing_would_help);
                let recommendation = Recommendation {
                    action,
                    suggested_share_focus: judgment
                        .suggested_share_focus
                        .filter(|_| action != ShareAction::Proceed),
                    suggested_content: judgment
                        .suggested_share_content
                        .filter(|_| action != ShareAction::Proceed),
                };
                Ok(ReconcilerResult::new(
                    inputs,
                    judgment.alignment,
                    judgment.gaps,
                    recommendation,
                ))
            }
            Err(err) => {
                tracing::warn!(
                    target: "reconciler",
                    session_id = %context.session_id,
                    turn_id = %context.turn_id,
                    guesser_id = %context.guesser_id,
                    subject_id = %context.subject_id,
                    revision = context.attempt_revision,
                    error = %err,
                    "judgment unavailable, proceeding without gap analysis"
                );
                Ok(ReconcilerResult::fallback(inputs))
            }
        }
    }

    /// Best-effort return of a claimed attempt to its previous status after a
    /// storage failure, so it is not left locked in `ANALYZING`. Unanalysed
    /// content never goes back to a reveal-eligible status.
    async fn release(&self, session_id: &str, guesser_id: &str, previous: EmpathyStatus) {
        let restored = async {
            let mut attempt = self.load_attempt(session_id, guesser_id).await?;
            if attempt.status == EmpathyStatus::Analyzing {
                attempt.status = if !attempt.analyzed && previous.is_reveal_eligible() {
                    EmpathyStatus::Refining
                } else {
                    previous
                };
                self.attempts.update(&attempt).await?;
            }
            Ok::<(), ParleyError>(())
        }
        .await;

        if let Err(err) = restored {
            tracing::error!(
                target: "reconciler",
                session_id,
                guesser_id,
                error = %err,
                "failed to release analysis claim"
            );
        }
    }
}

fn in_flight(attempt: EmpathyAttempt, latest: Option<ReconcilerResult>) -> ReconcileReport {
    tracing::debug!(
        target: "reconciler",
        session_id = %attempt.session_id,
        guesser_id = %attempt.guesser_id,
        "analysis already in flight"
    );
    ReconcileReport {
        outcome: ReconcileOutcome::InFlight(latest),
        attempt,
        offer: None,
    }
}
