//! Use cases of the Parley core.
//!
//! - [`StageProgressStore`]: atomic per-tuple gate writes
//! - [`EmpathyReconciler`]: gap analysis orchestration
//! - [`ShareOfferNegotiator`]: consent-gated disclosure and delivery tracking
//! - [`SessionStageMachine`]: the operations exposed to a transport

pub mod locks;
pub mod progress_store;
pub mod reconciler;
pub mod share_offer;
pub mod stage_machine;
pub mod views;

pub use progress_store::{GateChange, StageProgressStore};
pub use reconciler::{EmpathyReconciler, ReconcileOutcome, ReconcileReport};
pub use share_offer::{ReplyOutcome, ShareOfferNegotiator, ShareOfferReply, SharedContextView};
pub use stage_machine::{EmpathySubmission, GateConfirmation, SessionStageMachine};
pub use views::{EmpathyExchangeView, GateStateView, OwnAttemptView, PartnerAttemptView};

use parley_core::consent::ConsentRepository;
use parley_core::empathy::EmpathyAttemptRepository;
use parley_core::message::MessageRepository;
use parley_core::reconciler::ReconcilerResultRepository;
use parley_core::session::SessionRepository;
use parley_core::share::ShareOfferRepository;
use parley_core::stage::StageProgressRepository;
use std::sync::Arc;

/// The storage capabilities the use cases need.
#[derive(Clone)]
pub struct Repositories {
    pub sessions: Arc<dyn SessionRepository>,
    pub progress: Arc<dyn StageProgressRepository>,
    pub attempts: Arc<dyn EmpathyAttemptRepository>,
    pub results: Arc<dyn ReconcilerResultRepository>,
    pub offers: Arc<dyn ShareOfferRepository>,
    pub consents: Arc<dyn ConsentRepository>,
    pub messages: Arc<dyn MessageRepository>,
}

impl Repositories {
    /// Uses one store for every entity type.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: SessionRepository
            + StageProgressRepository
            + EmpathyAttemptRepository
            + ReconcilerResultRepository
            + ShareOfferRepository
            + ConsentRepository
            + MessageRepository
            + 'static,
    {
        Self {
            sessions: store.clone(),
            progress: store.clone(),
            attempts: store.clone(),
            results: store.clone(),
            offers: store.clone(),
            consents: store.clone(),
            messages: store,
        }
    }
}
