//! Session domain module.
//!
//! - `model`: the two-member `Session` and its lifecycle
//! - `repository`: persistence trait
//! - `event`: realtime events and the publisher capability

mod event;
mod model;
mod repository;

pub use event::{NoOpEventPublisher, SessionEvent, SessionEventPublisher};
pub use model::{Session, SessionStatus};
pub use repository::SessionRepository;
