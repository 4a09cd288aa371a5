//! `parley simulate`: two partners walk through the empathy exchange
//! against the offline judge.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use parley_application::{Repositories, SessionStageMachine, ShareOfferReply};
use parley_core::config::ParleyConfig;
use parley_core::session::{SessionEvent, SessionEventPublisher};
use parley_core::stage::Stage;
use parley_execution::{BackgroundExecutor, init_tracing};
use parley_infrastructure::{ConfigService, MemoryStore};
use parley_interaction::LexiconJudge;
use std::path::PathBuf;
use std::sync::Arc;

const ALICE: &str = "alice";
const BOB: &str = "bob";

const ALICE_STORY: &str =
    "I feel invisible when plans change without me. I need to be included.";
const BOB_STORY: &str =
    "I feel unrecognized and exhausted. I just want my effort at home to be noticed.";

/// Publishes events to the log instead of a realtime channel.
struct LogPublisher;

#[async_trait]
impl SessionEventPublisher for LogPublisher {
    async fn publish(&self, session_id: &str, event: &SessionEvent) -> Result<(), String> {
        let payload = serde_json::to_string(event).map_err(|e| e.to_string())?;
        tracing::info!(target: "events", session_id, event = event.name(), %payload, "published");
        Ok(())
    }
}

pub async fn run(service: &ConfigService, snapshot: Option<PathBuf>, json: bool) -> Result<()> {
    let config = service.get_config().context("Failed to load configuration")?;
    init_tracing(&config.logging).context("Failed to initialize logging")?;

    let store = match snapshot.or_else(|| config.store.snapshot_path.clone()) {
        Some(path) => MemoryStore::open(&path)
            .with_context(|| format!("Failed to open store snapshot {}", path.display()))?,
        None => MemoryStore::new(),
    };

    let (executor, mut failures) = BackgroundExecutor::new();
    let machine = build_machine(Arc::new(store), executor, config);

    let session_id = walk_through(&machine).await?;
    machine.executor().wait_idle().await;

    let mut failed = 0;
    while let Ok(failure) = failures.try_recv() {
        failed += 1;
        eprintln!("background job {} failed: {}", failure.label, failure.error);
    }

    if json {
        let mut views = Vec::new();
        for user in [ALICE, BOB] {
            views.push(machine.get_empathy_exchange_status(&session_id, user).await?);
        }
        println!("{}", serde_json::to_string_pretty(&views)?);
    }

    if failed > 0 {
        return Err(anyhow!("{} background job(s) failed", failed));
    }
    Ok(())
}

fn build_machine(
    store: Arc<MemoryStore>,
    executor: BackgroundExecutor,
    config: ParleyConfig,
) -> SessionStageMachine {
    SessionStageMachine::new(
        Repositories::from_store(store),
        Arc::new(LexiconJudge::new()),
        executor,
        config,
    )
    .with_publisher(Arc::new(LogPublisher))
}

/// Runs the scenario and returns the session id.
async fn walk_through(machine: &SessionStageMachine) -> Result<String> {
    let session = machine.create_session("demo", ALICE, BOB).await?;
    machine.accept_invitation(&session.id, BOB).await?;
    println!("session {} between {} and {}", session.id, ALICE, BOB);

    for user in [ALICE, BOB] {
        machine
            .confirm_gate(&session.id, user, Stage::Onboarding, "compactSigned", true)
            .await?;
    }
    println!("both signed the compact");

    for (user, story) in [(ALICE, ALICE_STORY), (BOB, BOB_STORY)] {
        machine.send_message(&session.id, user, story).await?;
        machine
            .confirm_gate(&session.id, user, Stage::Witness, "feelHeardConfirmed", true)
            .await?;
        println!("{} shared: {}", user, story);
    }

    let first = machine
        .submit_empathy_attempt(&session.id, ALICE, "You feel frustrated about the chores")
        .await?;
    println!("{} guessed, statement {}", ALICE, first.attempt.status);
    let second = machine
        .submit_empathy_attempt(
            &session.id,
            BOB,
            "You feel overlooked when plans change, and you want to be included",
        )
        .await?;
    println!("{} guessed, statement {}", BOB, second.attempt.status);

    if let Some(offer) = machine.get_share_offer(&session.id, BOB).await? {
        println!(
            "{} was asked to share more (focus: {})",
            BOB,
            offer.suggested_share_focus.as_deref().unwrap_or("-")
        );
        machine
            .respond_to_share_offer(
                &offer.id,
                BOB,
                ShareOfferReply::Accept {
                    content: Some("I need my effort at home to be noticed.".into()),
                },
            )
            .await?;

        for context in machine.get_shared_context(&session.id, ALICE).await? {
            println!("{} received: {}", ALICE, context.content);
            machine
                .mark_shared_context_seen(&session.id, ALICE, &context.offer_id)
                .await?;
        }

        let revised = machine
            .submit_empathy_attempt(
                &session.id,
                ALICE,
                "You feel unrecognized and exhausted, and you need your effort at home to be noticed",
            )
            .await?;
        println!("{} revised, statement {}", ALICE, revised.attempt.status);
    }

    for subject in [BOB, ALICE] {
        let exchange = machine
            .get_empathy_exchange_status(&session.id, subject)
            .await?;
        if let Some(content) = exchange.partner.and_then(|p| p.content) {
            println!("{} reads: {}", subject, content);
            machine
                .validate_empathy(&session.id, subject, true, None)
                .await?;
        }
    }

    for user in [ALICE, BOB] {
        let state = machine.get_gate_state(&session.id, user).await?;
        let stage = state
            .current
            .map(|p| p.stage.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{} is now at {} ({})", user, stage, state.session_status);
    }

    Ok(session.id)
}
