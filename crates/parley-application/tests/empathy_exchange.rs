mod common;

use common::*;
use parley_application::{ReconcileOutcome, ShareOfferReply};
use parley_core::ParleyError;
use parley_core::config::ParleyConfig;
use parley_core::consent::{ConsentDecision, ConsentTarget};
use parley_core::empathy::{Direction, EmpathyStatus};
use parley_core::reconciler::{ReconcilerResultRepository, ShareAction};
use parley_core::session::SessionEvent;
use parley_core::share::{DeliveryStatus, ShareOfferStatus};
use parley_core::stage::{GateKey, Stage, StageProgressRepository};
use parley_execution::CaptureLayer;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing_subscriber::layer::SubscriberExt;

const ALICE_GUESS: &str = "You feel frustrated about the chores";
const BOB_GUESS: &str = "You feel left out when plans change";

#[tokio::test]
async fn test_submission_requires_feeling_heard() {
    let h = Harness::new();
    let session = h.active_session().await;
    h.through_onboarding(&session.id).await;

    let err = h
        .machine
        .submit_empathy_attempt(&session.id, ALICE, ALICE_GUESS)
        .await
        .unwrap_err();
    match err {
        ParleyError::StageBlocked(blocked) => {
            assert_eq!(blocked.stage, Stage::Witness);
            assert_eq!(blocked.unsatisfied_gates, vec![GateKey::FeelHeardConfirmed]);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let err = h
        .machine
        .submit_empathy_attempt(&session.id, ALICE, "   ")
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_statement_is_capped() {
    let mut config = ParleyConfig::default();
    config.empathy.max_content_chars = 10;
    let h = Harness::with_config(config);
    let session = h.active_session().await;
    h.through_witness(&session.id).await;

    let err = h
        .machine
        .submit_empathy_attempt(&session.id, ALICE, ALICE_GUESS)
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_first_statement_is_held_and_hidden() {
    let h = Harness::new();
    let session = h.active_session().await;
    h.through_witness(&session.id).await;

    let submitted = h
        .machine
        .submit_empathy_attempt(&session.id, ALICE, ALICE_GUESS)
        .await
        .unwrap();
    assert_eq!(submitted.attempt.status, EmpathyStatus::Held);
    assert!(!submitted.analyzed);
    assert_eq!(h.judge.calls(), 0);

    let bob_view = h
        .machine
        .get_empathy_exchange_status(&session.id, BOB)
        .await
        .unwrap();
    let partner = bob_view.partner.as_ref().unwrap();
    assert_eq!(partner.status, EmpathyStatus::Held);
    assert_eq!(partner.content, None);
    assert!(bob_view.own.is_none());

    let json = serde_json::to_string(&bob_view).unwrap();
    assert!(!json.contains(ALICE_GUESS));

    let progress = StageProgressRepository::find(&*h.store, &session.id, ALICE, Stage::Perspective)
        .await
        .unwrap()
        .unwrap();
    assert!(progress.gates.is_set(GateKey::EmpathyDraftReady));
    assert!(progress.gates.is_set(GateKey::EmpathyConsented));
    assert!(!progress.gates.is_set(GateKey::PartnerValidated));

    let consents = h.machine.list_consents(&session.id, ALICE).await.unwrap();
    assert_eq!(consents.len(), 1);
    assert_eq!(consents[0].target, ConsentTarget::EmpathyAttempt);
    assert_eq!(consents[0].decision, ConsentDecision::Granted);
}

#[tokio::test]
async fn test_early_statement_seeds_perspective_gates() {
    let h = Harness::new();
    let session = h.active_session().await;
    h.through_onboarding(&session.id).await;
    h.machine
        .send_message(&session.id, ALICE, ALICE_WITNESS)
        .await
        .unwrap();
    h.machine
        .confirm_gate(&session.id, ALICE, Stage::Witness, "feelHeardConfirmed", true)
        .await
        .unwrap();

    // Bob is still being witnessed; Alice has no perspective row yet.
    h.machine
        .submit_empathy_attempt(&session.id, ALICE, ALICE_GUESS)
        .await
        .unwrap();
    assert!(StageProgressRepository::find(&*h.store, &session.id, ALICE, Stage::Perspective)
        .await
        .unwrap()
        .is_none());

    h.machine
        .send_message(&session.id, BOB, BOB_WITNESS)
        .await
        .unwrap();
    let confirmation = h
        .machine
        .confirm_gate(&session.id, BOB, Stage::Witness, "feelHeardConfirmed", true)
        .await
        .unwrap();
    assert_eq!(confirmation.advanced_to, Some(Stage::Perspective));

    let alice = StageProgressRepository::find(&*h.store, &session.id, ALICE, Stage::Perspective)
        .await
        .unwrap()
        .unwrap();
    assert!(alice.gates.is_set(GateKey::EmpathyConsented));
    let bob = StageProgressRepository::find(&*h.store, &session.id, BOB, Stage::Perspective)
        .await
        .unwrap()
        .unwrap();
    assert!(!bob.gates.is_set(GateKey::EmpathyConsented));
}

#[tokio::test]
async fn test_statements_are_revealed_together() {
    let h = Harness::new();
    let session = h.active_session().await;
    h.through_witness(&session.id).await;

    h.machine
        .submit_empathy_attempt(&session.id, ALICE, ALICE_GUESS)
        .await
        .unwrap();
    let submitted = h
        .machine
        .submit_empathy_attempt(&session.id, BOB, BOB_GUESS)
        .await
        .unwrap();
    assert!(submitted.analyzed);
    assert_eq!(submitted.attempt.status, EmpathyStatus::Revealed);
    assert_eq!(h.judge.calls(), 2);

    let alice_view = h
        .machine
        .get_empathy_exchange_status(&session.id, ALICE)
        .await
        .unwrap();
    let bob_view = h
        .machine
        .get_empathy_exchange_status(&session.id, BOB)
        .await
        .unwrap();
    let alice_own = alice_view.own.unwrap();
    let bob_own = bob_view.own.unwrap();
    assert_eq!(alice_own.status, EmpathyStatus::Revealed);
    assert_eq!(bob_own.status, EmpathyStatus::Revealed);
    assert_eq!(alice_own.revealed_at, bob_own.revealed_at);

    assert_eq!(
        alice_view.partner.unwrap().content.as_deref(),
        Some(BOB_GUESS)
    );
    assert_eq!(bob_view.partner.unwrap().content.as_deref(), Some(ALICE_GUESS));

    let events = h.events().await;
    let reveals: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::EmpathyRevealed { guesser_ids } => Some(guesser_ids.len()),
            _ => None,
        })
        .collect();
    assert_eq!(reveals, vec![2]);
}

#[tokio::test]
async fn test_judge_sees_subject_witness_content() {
    let h = Harness::new();
    let session = h.active_session().await;
    h.through_witness(&session.id).await;

    h.machine
        .submit_empathy_attempt(&session.id, ALICE, ALICE_GUESS)
        .await
        .unwrap();
    h.machine
        .submit_empathy_attempt(&session.id, BOB, BOB_GUESS)
        .await
        .unwrap();

    let requests = h.judge.requests();
    let (context, request) = requests
        .iter()
        .find(|(context, _)| context.guesser_id == ALICE)
        .unwrap();
    assert_eq!(context.subject_id, BOB);
    assert_eq!(request.guess, ALICE_GUESS);
    assert_eq!(request.actual, BOB_WITNESS);
    assert!(!context.turn_id.is_empty());
}

#[tokio::test]
async fn test_unchanged_inputs_reuse_result() {
    let h = Harness::new();
    let session = h.active_session().await;
    h.through_witness(&session.id).await;
    h.machine
        .submit_empathy_attempt(&session.id, ALICE, ALICE_GUESS)
        .await
        .unwrap();
    h.machine
        .submit_empathy_attempt(&session.id, BOB, BOB_GUESS)
        .await
        .unwrap();
    let calls = h.judge.calls();

    let direction = Direction::new(ALICE, BOB);
    let first = h.machine.run_reconciler(&session.id, &direction).await.unwrap();
    let second = h.machine.run_reconciler(&session.id, &direction).await.unwrap();
    assert!(matches!(first.outcome, ReconcileOutcome::Reused(_)));
    assert!(matches!(second.outcome, ReconcileOutcome::Reused(_)));
    assert_eq!(
        first.outcome.result().unwrap().id,
        second.outcome.result().unwrap().id
    );
    assert_eq!(h.judge.calls(), calls);

    let results = ReconcilerResultRepository::list_for_direction(&*h.store, &session.id, ALICE, BOB)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn test_reconciler_needs_both_statements() {
    let h = Harness::new();
    let session = h.active_session().await;
    h.through_witness(&session.id).await;
    h.machine
        .submit_empathy_attempt(&session.id, ALICE, ALICE_GUESS)
        .await
        .unwrap();

    let err = h
        .machine
        .run_reconciler(&session.id, &Direction::new(ALICE, BOB))
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    let err = h
        .machine
        .run_reconciler(&session.id, &Direction::new(ALICE, "mallory"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_gap_holds_reveal_until_share_decision() {
    let h = Harness::new();
    h.judge.push(ALICE, Step::Respond(significant_gap("recognition")));
    let session = h.active_session().await;
    h.through_witness(&session.id).await;

    h.machine
        .submit_empathy_attempt(&session.id, ALICE, ALICE_GUESS)
        .await
        .unwrap();
    let bob = h
        .machine
        .submit_empathy_attempt(&session.id, BOB, BOB_GUESS)
        .await
        .unwrap();
    assert_eq!(bob.attempt.status, EmpathyStatus::Ready);

    let alice_view = h
        .machine
        .get_empathy_exchange_status(&session.id, ALICE)
        .await
        .unwrap();
    assert_eq!(alice_view.own.unwrap().status, EmpathyStatus::AwaitingSharing);
    assert_eq!(alice_view.partner.unwrap().content, None);

    let bob_view = h
        .machine
        .get_empathy_exchange_status(&session.id, BOB)
        .await
        .unwrap();
    assert!(bob_view.share_offer_pending);

    let offer = h
        .machine
        .get_share_offer(&session.id, BOB)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(offer.status, ShareOfferStatus::Offered);
    assert_eq!(offer.action, ShareAction::OfferSharing);
    assert_eq!(offer.suggested_share_focus.as_deref(), Some("recognition"));
    assert!(h
        .machine
        .get_share_offer(&session.id, ALICE)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_declining_never_forces_disclosure() {
    let h = Harness::new();
    h.judge.push(ALICE, Step::Respond(significant_gap("recognition")));
    let session = h.active_session().await;
    h.through_witness(&session.id).await;
    h.machine
        .submit_empathy_attempt(&session.id, ALICE, ALICE_GUESS)
        .await
        .unwrap();
    h.machine
        .submit_empathy_attempt(&session.id, BOB, BOB_GUESS)
        .await
        .unwrap();

    let offer = h
        .machine
        .get_share_offer(&session.id, BOB)
        .await
        .unwrap()
        .unwrap();

    // Only the subject may answer.
    let err = h
        .machine
        .respond_to_share_offer(&offer.id, ALICE, ShareOfferReply::Decline)
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let declined = h
        .machine
        .respond_to_share_offer(&offer.id, BOB, ShareOfferReply::Decline)
        .await
        .unwrap();
    assert_eq!(declined.status, ShareOfferStatus::Declined);
    assert_eq!(declined.shared_content, None);

    let shared = h
        .machine
        .get_shared_context(&session.id, ALICE)
        .await
        .unwrap();
    assert!(shared.is_empty());

    let alice_view = h
        .machine
        .get_empathy_exchange_status(&session.id, ALICE)
        .await
        .unwrap();
    assert_eq!(alice_view.own.unwrap().status, EmpathyStatus::Revealed);

    let err = h
        .machine
        .respond_to_share_offer(&offer.id, BOB, ShareOfferReply::Accept { content: None })
        .await
        .unwrap_err();
    match err {
        ParleyError::Conflict { current_state, .. } => assert_eq!(current_state, "DECLINED"),
        other => panic!("unexpected error: {other:?}"),
    }

    let consents = h.machine.list_consents(&session.id, BOB).await.unwrap();
    assert!(consents.iter().any(|c| c.target == ConsentTarget::ShareOffer
        && c.decision == ConsentDecision::Denied
        && c.target_id == offer.id));
}

#[tokio::test]
async fn test_skip_gates_like_decline() {
    let h = Harness::new();
    h.judge.push(ALICE, Step::Respond(significant_gap("recognition")));
    let session = h.active_session().await;
    h.through_witness(&session.id).await;
    h.machine
        .submit_empathy_attempt(&session.id, ALICE, ALICE_GUESS)
        .await
        .unwrap();
    h.machine
        .submit_empathy_attempt(&session.id, BOB, BOB_GUESS)
        .await
        .unwrap();

    let offer = h
        .machine
        .get_share_offer(&session.id, BOB)
        .await
        .unwrap()
        .unwrap();
    let skipped = h
        .machine
        .respond_to_share_offer(&offer.id, BOB, ShareOfferReply::Skip)
        .await
        .unwrap();
    assert_eq!(skipped.status, ShareOfferStatus::Declined);

    let view = h
        .machine
        .get_empathy_exchange_status(&session.id, BOB)
        .await
        .unwrap();
    assert_eq!(view.partner.unwrap().status, EmpathyStatus::Revealed);
}

#[tokio::test]
async fn test_shared_context_delivery_moves_forward() {
    let h = Harness::new();
    h.judge.push(ALICE, Step::Respond(significant_gap("recognition")));
    let session = h.active_session().await;
    h.through_witness(&session.id).await;
    h.machine
        .submit_empathy_attempt(&session.id, ALICE, ALICE_GUESS)
        .await
        .unwrap();
    h.machine
        .submit_empathy_attempt(&session.id, BOB, BOB_GUESS)
        .await
        .unwrap();

    let offer = h
        .machine
        .get_share_offer(&session.id, BOB)
        .await
        .unwrap()
        .unwrap();
    let refined = h
        .machine
        .respond_to_share_offer(
            &offer.id,
            BOB,
            ShareOfferReply::Refine {
                content: "I need my effort to be noticed".into(),
            },
        )
        .await
        .unwrap();
    assert_eq!(refined.status, ShareOfferStatus::Offered);

    let accepted = h
        .machine
        .respond_to_share_offer(&offer.id, BOB, ShareOfferReply::Accept { content: None })
        .await
        .unwrap();
    assert_eq!(
        accepted.shared_content.as_deref(),
        Some("I need my effort to be noticed")
    );
    assert_eq!(accepted.delivery_status, Some(DeliveryStatus::Pending));

    let alice_view = h
        .machine
        .get_empathy_exchange_status(&session.id, ALICE)
        .await
        .unwrap();
    assert_eq!(alice_view.own.unwrap().status, EmpathyStatus::Refining);
    assert_eq!(alice_view.unseen_shared_context, 1);

    let shared = h
        .machine
        .get_shared_context(&session.id, ALICE)
        .await
        .unwrap();
    assert_eq!(shared.len(), 1);
    assert_eq!(shared[0].delivery_status, DeliveryStatus::Delivered);
    assert!(h
        .machine
        .get_shared_context(&session.id, BOB)
        .await
        .unwrap()
        .is_empty());

    let seen = h
        .machine
        .mark_shared_context_seen(&session.id, ALICE, &offer.id)
        .await
        .unwrap();
    assert_eq!(seen.delivery_status, Some(DeliveryStatus::Seen));

    // Reading again never moves delivery backwards.
    let shared = h
        .machine
        .get_shared_context(&session.id, ALICE)
        .await
        .unwrap();
    assert_eq!(shared[0].delivery_status, DeliveryStatus::Seen);
    let again = h
        .machine
        .mark_shared_context_seen(&session.id, ALICE, &offer.id)
        .await
        .unwrap();
    assert_eq!(again.seen_at, seen.seen_at);

    let alice_view = h
        .machine
        .get_empathy_exchange_status(&session.id, ALICE)
        .await
        .unwrap();
    assert_eq!(alice_view.unseen_shared_context, 0);

    let err = h
        .machine
        .mark_shared_context_seen(&session.id, BOB, &offer.id)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_resubmission_supersedes_undelivered_context() {
    let h = Harness::new();
    h.judge.push(ALICE, Step::Respond(significant_gap("recognition")));
    let session = h.active_session().await;
    h.through_witness(&session.id).await;
    h.machine
        .submit_empathy_attempt(&session.id, ALICE, ALICE_GUESS)
        .await
        .unwrap();
    h.machine
        .submit_empathy_attempt(&session.id, BOB, BOB_GUESS)
        .await
        .unwrap();

    let offer = h
        .machine
        .get_share_offer(&session.id, BOB)
        .await
        .unwrap()
        .unwrap();
    h.machine
        .respond_to_share_offer(
            &offer.id,
            BOB,
            ShareOfferReply::Accept {
                content: Some("I want to be thanked sometimes".into()),
            },
        )
        .await
        .unwrap();

    // Alice revises before the shared context reached her.
    let resubmitted = h
        .machine
        .submit_empathy_attempt(&session.id, ALICE, "You feel unappreciated")
        .await
        .unwrap();
    assert_eq!(resubmitted.attempt.revision_count, 1);
    assert_eq!(resubmitted.attempt.status, EmpathyStatus::Revealed);

    assert!(h
        .machine
        .get_shared_context(&session.id, ALICE)
        .await
        .unwrap()
        .is_empty());
    let err = h
        .machine
        .mark_shared_context_seen(&session.id, ALICE, &offer.id)
        .await
        .unwrap_err();
    match err {
        ParleyError::Conflict { current_state, .. } => assert_eq!(current_state, "superseded"),
        other => panic!("unexpected error: {other:?}"),
    }
}

/// A harness whose attempt writes go through [`GatedAttempts`], with both
/// statements already revealed.
async fn revealed_exchange() -> (Harness, Arc<GatedAttempts>, String) {
    let mut gated = None;
    let h = Harness::with_repositories(|store, repos| {
        let attempts = Arc::new(GatedAttempts::new(Arc::clone(store)));
        repos.attempts = attempts.clone();
        gated = Some(attempts);
    });
    let attempts = gated.unwrap();
    let session = h.active_session().await;
    h.through_witness(&session.id).await;
    h.machine
        .submit_empathy_attempt(&session.id, ALICE, ALICE_GUESS)
        .await
        .unwrap();
    h.machine
        .submit_empathy_attempt(&session.id, BOB, BOB_GUESS)
        .await
        .unwrap();

    let partner = h
        .machine
        .get_empathy_exchange_status(&session.id, BOB)
        .await
        .unwrap()
        .partner
        .unwrap();
    assert_eq!(partner.status, EmpathyStatus::Revealed);
    assert_eq!(partner.content.as_deref(), Some(ALICE_GUESS));
    (h, attempts, session.id)
}

#[tokio::test]
async fn test_resubmitted_statement_is_hidden_until_analyzed() {
    let (h, attempts, session_id) = revealed_exchange().await;
    let revised = "You feel unseen when I forget to say thanks";

    // Park the re-submission right after its content is stored and read
    // Bob's view before the reconciler runs.
    attempts.gate.arm();
    let (resubmitted, during) = tokio::join!(
        h.machine.submit_empathy_attempt(&session_id, ALICE, revised),
        async {
            attempts.gate.reached().await;
            let view = h.machine.get_empathy_exchange_status(&session_id, BOB).await;
            attempts.gate.resume();
            view
        }
    );

    let partner = during.unwrap().partner.unwrap();
    assert_eq!(partner.status, EmpathyStatus::Refining);
    assert_eq!(partner.content, None);
    assert_eq!(partner.revealed_at, None);

    let resubmitted = resubmitted.unwrap();
    assert!(resubmitted.analyzed);
    assert_eq!(resubmitted.attempt.status, EmpathyStatus::Revealed);
    assert_eq!(resubmitted.attempt.revision_count, 1);

    let partner = h
        .machine
        .get_empathy_exchange_status(&session_id, BOB)
        .await
        .unwrap()
        .partner
        .unwrap();
    assert_eq!(partner.content.as_deref(), Some(revised));
}

#[tokio::test]
async fn test_failed_analysis_write_is_healed_by_rerun() {
    let (h, attempts, session_id) = revealed_exchange().await;
    let revised = "You feel unseen when I forget to say thanks";
    let calls = h.judge.calls();

    attempts.fail_next_settle.store(true, Ordering::SeqCst);
    let err = h
        .machine
        .submit_empathy_attempt(&session_id, ALICE, revised)
        .await
        .unwrap_err();
    assert!(matches!(err, ParleyError::DataAccess(_)));
    assert_eq!(h.judge.calls(), calls + 1);

    // The result was stored but the statement never took it.
    let partner = h
        .machine
        .get_empathy_exchange_status(&session_id, BOB)
        .await
        .unwrap()
        .partner
        .unwrap();
    assert_eq!(partner.status, EmpathyStatus::Refining);
    assert_eq!(partner.content, None);
    let results = ReconcilerResultRepository::list_for_direction(&*h.store, &session_id, ALICE, BOB)
        .await
        .unwrap();
    assert_eq!(results.len(), 2);

    let report = h
        .machine
        .run_reconciler(&session_id, &Direction::new(ALICE, BOB))
        .await
        .unwrap();
    match &report.outcome {
        ReconcileOutcome::Reused(result) => assert_eq!(result.id, results.last().unwrap().id),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(report.attempt.analyzed);
    assert_eq!(report.attempt.status, EmpathyStatus::Revealed);
    assert_eq!(h.judge.calls(), calls + 1);

    let partner = h
        .machine
        .get_empathy_exchange_status(&session_id, BOB)
        .await
        .unwrap()
        .partner
        .unwrap();
    assert_eq!(partner.content.as_deref(), Some(revised));
    let results = ReconcilerResultRepository::list_for_direction(&*h.store, &session_id, ALICE, BOB)
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
}

#[tokio::test]
async fn test_judgment_failure_degrades_to_proceed() {
    let (layer, mut logs) = CaptureLayer::channel();
    let subscriber = tracing_subscriber::registry().with(layer);
    let _guard = tracing::subscriber::set_default(subscriber);

    let h = Harness::new();
    h.judge.push(ALICE, Step::Fail);
    let session = h.active_session().await;
    h.through_witness(&session.id).await;
    h.machine
        .submit_empathy_attempt(&session.id, ALICE, ALICE_GUESS)
        .await
        .unwrap();
    let bob = h
        .machine
        .submit_empathy_attempt(&session.id, BOB, BOB_GUESS)
        .await
        .unwrap();
    assert_eq!(bob.attempt.status, EmpathyStatus::Revealed);

    let result = ReconcilerResultRepository::find_latest(&*h.store, &session.id, ALICE, BOB)
        .await
        .unwrap()
        .unwrap();
    assert!(result.degraded);
    assert_eq!(result.recommendation.action, ShareAction::Proceed);
    assert!(h
        .machine
        .get_share_offer(&session.id, BOB)
        .await
        .unwrap()
        .is_none());

    let mut warned = false;
    while let Ok(event) = logs.try_recv() {
        if event.target == "reconciler" && event.level == "WARN" {
            assert_eq!(event.field_str("guesser_id"), Some(ALICE));
            assert_eq!(event.field_str("session_id"), Some(session.id.as_str()));
            assert!(event.fields.contains_key("turn_id"));
            warned = true;
        }
    }
    assert!(warned);
}

#[tokio::test]
async fn test_judgment_timeout_degrades_to_proceed() {
    let mut config = ParleyConfig::default();
    config.reconciler.judge_timeout_secs = 1;
    let h = Harness::with_config(config);
    h.judge.push(BOB, Step::Hang);
    let session = h.active_session().await;
    h.through_witness(&session.id).await;

    h.machine
        .submit_empathy_attempt(&session.id, ALICE, ALICE_GUESS)
        .await
        .unwrap();
    let bob = h
        .machine
        .submit_empathy_attempt(&session.id, BOB, BOB_GUESS)
        .await
        .unwrap();
    assert_eq!(bob.attempt.status, EmpathyStatus::Revealed);

    let result = ReconcilerResultRepository::find_latest(&*h.store, &session.id, BOB, ALICE)
        .await
        .unwrap()
        .unwrap();
    assert!(result.degraded);
}

#[tokio::test]
async fn test_validation_completes_perspective_stage() {
    let h = Harness::new();
    let session = h.active_session().await;
    h.through_witness(&session.id).await;
    h.machine
        .submit_empathy_attempt(&session.id, ALICE, ALICE_GUESS)
        .await
        .unwrap();
    h.machine
        .submit_empathy_attempt(&session.id, BOB, BOB_GUESS)
        .await
        .unwrap();

    let validated = h
        .machine
        .validate_empathy(&session.id, BOB, true, Some("  that is it  "))
        .await
        .unwrap();
    assert_eq!(validated.guesser_id, ALICE);
    assert_eq!(validated.status, EmpathyStatus::Validated);
    let verdict = validated.validation.unwrap();
    assert!(verdict.accurate);
    assert_eq!(verdict.feedback.as_deref(), Some("that is it"));

    let bob_state = h.machine.get_gate_state(&session.id, BOB).await.unwrap();
    assert!(bob_state.current.unwrap().is_completed());

    let err = h
        .machine
        .validate_empathy(&session.id, BOB, true, None)
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    h.machine
        .validate_empathy(&session.id, ALICE, true, None)
        .await
        .unwrap();
    for user in [ALICE, BOB] {
        let state = h.machine.get_gate_state(&session.id, user).await.unwrap();
        assert_eq!(state.current.unwrap().stage, Stage::NeedMapping);
    }

    let err = h
        .machine
        .submit_empathy_attempt(&session.id, ALICE, "You feel tired")
        .await
        .unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn test_inaccurate_verdict_invites_revision() {
    let h = Harness::new();
    let session = h.active_session().await;
    h.through_witness(&session.id).await;
    h.machine
        .submit_empathy_attempt(&session.id, ALICE, ALICE_GUESS)
        .await
        .unwrap();
    h.machine
        .submit_empathy_attempt(&session.id, BOB, BOB_GUESS)
        .await
        .unwrap();

    h.machine
        .validate_empathy(&session.id, BOB, false, Some("not quite"))
        .await
        .unwrap();
    let bob_state = h.machine.get_gate_state(&session.id, BOB).await.unwrap();
    assert!(!bob_state
        .current
        .unwrap()
        .gates
        .is_set(GateKey::PartnerValidated));

    let revised = h
        .machine
        .submit_empathy_attempt(&session.id, ALICE, "You feel unrecognized at home")
        .await
        .unwrap();
    assert_eq!(revised.attempt.revision_count, 1);
    assert_eq!(revised.attempt.status, EmpathyStatus::Revealed);
    assert_eq!(revised.attempt.validation, None);

    h.machine
        .validate_empathy(&session.id, BOB, true, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_events_never_carry_private_content() {
    let h = Harness::new();
    h.judge.push(ALICE, Step::Respond(significant_gap("recognition")));
    let session = h.active_session().await;
    h.through_witness(&session.id).await;
    h.machine
        .submit_empathy_attempt(&session.id, ALICE, ALICE_GUESS)
        .await
        .unwrap();
    h.machine
        .submit_empathy_attempt(&session.id, BOB, BOB_GUESS)
        .await
        .unwrap();
    let offer = h
        .machine
        .get_share_offer(&session.id, BOB)
        .await
        .unwrap()
        .unwrap();
    h.machine
        .respond_to_share_offer(
            &offer.id,
            BOB,
            ShareOfferReply::Accept {
                content: Some("Being thanked matters to me".into()),
            },
        )
        .await
        .unwrap();

    let events = h.events().await;
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::ShareOfferAvailable { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::SharedContextAvailable { .. })));

    let json = serde_json::to_string(&events).unwrap();
    for private in [
        ALICE_WITNESS,
        BOB_WITNESS,
        ALICE_GUESS,
        BOB_GUESS,
        "Being thanked matters to me",
    ] {
        assert!(!json.contains(private), "event leaked {private:?}");
    }
}

#[tokio::test]
async fn test_recognition_scenario_end_to_end() {
    let h = Harness::new();
    h.judge.push(ALICE, Step::Respond(significant_gap("recognition")));
    let session = h.active_session().await;
    h.through_witness(&session.id).await;

    h.machine
        .submit_empathy_attempt(&session.id, ALICE, ALICE_GUESS)
        .await
        .unwrap();
    h.machine
        .submit_empathy_attempt(&session.id, BOB, BOB_GUESS)
        .await
        .unwrap();

    let offer = h
        .machine
        .get_share_offer(&session.id, BOB)
        .await
        .unwrap()
        .unwrap();
    h.machine
        .respond_to_share_offer(
            &offer.id,
            BOB,
            ShareOfferReply::Accept {
                content: Some("I need my effort at home to be recognized".into()),
            },
        )
        .await
        .unwrap();

    let shared = h
        .machine
        .get_shared_context(&session.id, ALICE)
        .await
        .unwrap();
    assert_eq!(shared[0].content, "I need my effort at home to be recognized");
    h.machine
        .mark_shared_context_seen(&session.id, ALICE, &shared[0].offer_id)
        .await
        .unwrap();

    let revised = h
        .machine
        .submit_empathy_attempt(
            &session.id,
            ALICE,
            "You feel unrecognized for everything you do at home",
        )
        .await
        .unwrap();
    assert!(revised.analyzed);
    assert_eq!(revised.attempt.status, EmpathyStatus::Revealed);
    assert_eq!(revised.attempt.revision_count, 1);

    let results = ReconcilerResultRepository::list_for_direction(&*h.store, &session.id, ALICE, BOB)
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[1].attempt_revision, 1);
    assert_eq!(results[1].recommendation.action, ShareAction::Proceed);

    h.machine
        .validate_empathy(&session.id, BOB, true, None)
        .await
        .unwrap();
    h.machine
        .validate_empathy(&session.id, ALICE, true, None)
        .await
        .unwrap();

    for user in [ALICE, BOB] {
        let state = h.machine.get_gate_state(&session.id, user).await.unwrap();
        assert_eq!(state.current.unwrap().stage, Stage::NeedMapping);
    }

    let seen = h
        .machine
        .get_shared_context(&session.id, ALICE)
        .await
        .unwrap();
    assert_eq!(seen[0].delivery_status, DeliveryStatus::Seen);
}
