//! Empathy exchange domain module.

mod model;
mod repository;

pub use model::{Direction, EmpathyAttempt, EmpathyStatus, EmpathyValidation};
pub use repository::EmpathyAttemptRepository;
