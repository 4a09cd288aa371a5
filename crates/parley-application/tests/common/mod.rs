//! Shared fixtures for the session flow tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parley_application::{Repositories, SessionStageMachine};
use parley_core::config::ParleyConfig;
use parley_core::empathy::{EmpathyAttempt, EmpathyAttemptRepository, EmpathyStatus};
use parley_core::error::{ParleyError, Result as ParleyResult};
use parley_core::indexer::TranscriptIndexer;
use parley_core::message::Message;
use parley_core::reconciler::{
    Alignment, GapSeverity, Gaps, Judgment, JudgmentCapability, JudgmentContext, JudgmentError,
    JudgmentRequest,
};
use parley_core::session::{Session, SessionEvent, SessionEventPublisher, SessionRepository};
use parley_core::stage::Stage;
use parley_execution::{BackgroundExecutor, JobFailure};
use parley_infrastructure::MemoryStore;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

pub const ALICE: &str = "alice";
pub const BOB: &str = "bob";

pub const ALICE_WITNESS: &str = "I feel invisible when plans change without me";
pub const BOB_WITNESS: &str = "I feel unrecognized for all the work I do at home";

/// One scripted reply of the judge.
pub enum Step {
    Respond(Judgment),
    Fail,
    /// Never answers within any sensible timeout.
    Hang,
}

/// A judge whose replies are scripted per guesser. Unscripted calls judge
/// the guess as aligned.
#[derive(Default)]
pub struct ScriptedJudge {
    script: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<(JudgmentContext, JudgmentRequest)>>,
}

impl ScriptedJudge {
    pub fn push(&self, guesser_id: &str, step: Step) {
        self.script
            .lock()
            .unwrap()
            .entry(guesser_id.to_string())
            .or_default()
            .push_back(step);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<(JudgmentContext, JudgmentRequest)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl JudgmentCapability for ScriptedJudge {
    async fn judge(
        &self,
        context: &JudgmentContext,
        request: &JudgmentRequest,
    ) -> Result<Judgment, JudgmentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push((context.clone(), request.clone()));

        let step = self
            .script
            .lock()
            .unwrap()
            .get_mut(&context.guesser_id)
            .and_then(|steps| steps.pop_front());
        match step {
            None => Ok(aligned()),
            Some(Step::Respond(judgment)) => Ok(judgment),
            Some(Step::Fail) => Err(JudgmentError::Unavailable("scripted outage".into())),
            Some(Step::Hang) => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(aligned())
            }
        }
    }
}

pub fn aligned() -> Judgment {
    Judgment {
        alignment: Alignment::new(92, "the guess matches"),
        gaps: Gaps::none(),
        sharing_would_help: false,
        suggested_share_focus: None,
        suggested_share_content: None,
    }
}

pub fn significant_gap(feeling: &str) -> Judgment {
    Judgment {
        alignment: Alignment::new(30, "the guess misses the core feeling"),
        gaps: Gaps {
            severity: GapSeverity::Significant,
            missed_feelings: vec![feeling.to_string()],
            summary: format!("{feeling} was not named"),
        },
        sharing_would_help: true,
        suggested_share_focus: Some(feeling.to_string()),
        suggested_share_content: None,
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<(String, SessionEvent)>>,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<(String, SessionEvent)> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionEventPublisher for RecordingPublisher {
    async fn publish(&self, session_id: &str, event: &SessionEvent) -> Result<(), String> {
        self.events
            .lock()
            .unwrap()
            .push((session_id.to_string(), event.clone()));
        Ok(())
    }
}

pub struct FailingPublisher;

#[async_trait]
impl SessionEventPublisher for FailingPublisher {
    async fn publish(&self, _session_id: &str, _event: &SessionEvent) -> Result<(), String> {
        Err("socket closed".to_string())
    }
}

#[derive(Default)]
pub struct CountingIndexer {
    pub indexed: AtomicUsize,
}

#[async_trait]
impl TranscriptIndexer for CountingIndexer {
    async fn index(&self, _message: &Message) -> Result<(), String> {
        self.indexed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct Harness {
    pub machine: SessionStageMachine,
    pub store: Arc<MemoryStore>,
    pub judge: Arc<ScriptedJudge>,
    pub publisher: Arc<RecordingPublisher>,
    pub failures: mpsc::UnboundedReceiver<JobFailure>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ParleyConfig::default())
    }

    pub fn with_config(config: ParleyConfig) -> Self {
        Self::build(config, |_, _| {})
    }

    /// A harness whose repositories can be swapped out before the machine
    /// is built. Unswapped ones use the shared store.
    pub fn with_repositories(
        customize: impl FnOnce(&Arc<MemoryStore>, &mut Repositories),
    ) -> Self {
        Self::build(ParleyConfig::default(), customize)
    }

    fn build(
        config: ParleyConfig,
        customize: impl FnOnce(&Arc<MemoryStore>, &mut Repositories),
    ) -> Self {
        let store = Arc::new(MemoryStore::new());
        let judge = Arc::new(ScriptedJudge::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let (executor, failures) = BackgroundExecutor::new();
        let mut repos = Repositories::from_store(Arc::clone(&store));
        customize(&store, &mut repos);
        let machine = SessionStageMachine::new(
            repos,
            judge.clone(),
            executor,
            config,
        )
        .with_publisher(publisher.clone());

        Self {
            machine,
            store,
            judge,
            publisher,
            failures,
        }
    }

    /// Waits for detached jobs and returns every event published so far.
    pub async fn events(&self) -> Vec<SessionEvent> {
        self.machine.executor().wait_idle().await;
        self.publisher
            .events()
            .into_iter()
            .map(|(_, event)| event)
            .collect()
    }

    /// An accepted session between Alice and Bob.
    pub async fn active_session(&self) -> Session {
        let session = self
            .machine
            .create_session("rel-1", ALICE, BOB)
            .await
            .unwrap();
        self.machine
            .accept_invitation(&session.id, BOB)
            .await
            .unwrap()
    }

    /// Both members sign the compact and enter the witness stage.
    pub async fn through_onboarding(&self, session_id: &str) {
        for user in [ALICE, BOB] {
            self.machine
                .confirm_gate(session_id, user, Stage::Onboarding, "compactSigned", true)
                .await
                .unwrap();
        }
    }

    /// Both members share their story, feel heard and enter the
    /// perspective stage.
    pub async fn through_witness(&self, session_id: &str) {
        self.through_onboarding(session_id).await;
        for (user, story) in [(ALICE, ALICE_WITNESS), (BOB, BOB_WITNESS)] {
            self.machine
                .send_message(session_id, user, story)
                .await
                .unwrap();
        }
        for user in [ALICE, BOB] {
            self.machine
                .confirm_gate(session_id, user, Stage::Witness, "feelHeardConfirmed", true)
                .await
                .unwrap();
        }
    }
}

/// Parks one write in the middle of an operation so a test can interleave
/// another call with it.
#[derive(Default)]
pub struct WriteGate {
    armed: AtomicBool,
    reached: Notify,
    resume: Notify,
}

impl WriteGate {
    /// The next gated write parks after it has been stored.
    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Waits until a gated write is parked.
    pub async fn reached(&self) {
        self.reached.notified().await;
    }

    pub fn resume(&self) {
        self.resume.notify_one();
    }

    async fn pass(&self) {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.reached.notify_one();
            self.resume.notified().await;
        }
    }
}

/// Session storage over the shared store whose `update` can be parked.
pub struct GatedSessions {
    pub store: Arc<MemoryStore>,
    pub gate: Arc<WriteGate>,
}

#[async_trait]
impl SessionRepository for GatedSessions {
    async fn find_by_id(&self, session_id: &str) -> ParleyResult<Option<Session>> {
        SessionRepository::find_by_id(&*self.store, session_id).await
    }

    async fn create(&self, session: &Session) -> ParleyResult<()> {
        SessionRepository::create(&*self.store, session).await
    }

    async fn update(&self, session: &Session) -> ParleyResult<Session> {
        let stored = SessionRepository::update(&*self.store, session).await?;
        self.gate.pass().await;
        Ok(stored)
    }

    async fn list_for_user(&self, user_id: &str) -> ParleyResult<Vec<Session>> {
        SessionRepository::list_for_user(&*self.store, user_id).await
    }
}

/// Attempt storage over the shared store. `update` can be parked after it
/// is stored, or made to fail once when it would record an analysis.
pub struct GatedAttempts {
    pub store: Arc<MemoryStore>,
    pub gate: Arc<WriteGate>,
    pub fail_next_settle: AtomicBool,
}

impl GatedAttempts {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            gate: Arc::new(WriteGate::default()),
            fail_next_settle: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl EmpathyAttemptRepository for GatedAttempts {
    async fn find_by_id(&self, attempt_id: &str) -> ParleyResult<Option<EmpathyAttempt>> {
        EmpathyAttemptRepository::find_by_id(&*self.store, attempt_id).await
    }

    async fn find_by_guesser(
        &self,
        session_id: &str,
        guesser_id: &str,
    ) -> ParleyResult<Option<EmpathyAttempt>> {
        EmpathyAttemptRepository::find_by_guesser(&*self.store, session_id, guesser_id).await
    }

    async fn list_for_session(&self, session_id: &str) -> ParleyResult<Vec<EmpathyAttempt>> {
        EmpathyAttemptRepository::list_for_session(&*self.store, session_id).await
    }

    async fn create(&self, attempt: &EmpathyAttempt) -> ParleyResult<()> {
        EmpathyAttemptRepository::create(&*self.store, attempt).await
    }

    async fn update(&self, attempt: &EmpathyAttempt) -> ParleyResult<EmpathyAttempt> {
        let settles = attempt.analyzed
            && matches!(
                attempt.status,
                EmpathyStatus::Ready | EmpathyStatus::AwaitingSharing
            );
        if settles && self.fail_next_settle.swap(false, Ordering::SeqCst) {
            return Err(ParleyError::data_access("disk full"));
        }
        let stored = EmpathyAttemptRepository::update(&*self.store, attempt).await?;
        self.gate.pass().await;
        Ok(stored)
    }
}
