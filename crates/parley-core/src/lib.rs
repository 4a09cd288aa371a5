//! Domain layer of the Parley conflict-resolution core.
//!
//! Entities, the gate rule table, the pure gate evaluator and the traits
//! through which the application layer reaches storage, judgment and
//! realtime fan-out.

pub mod config;
pub mod consent;
pub mod empathy;
pub mod error;
pub mod fingerprint;
pub mod indexer;
pub mod message;
pub mod reconciler;
pub mod session;
pub mod share;
pub mod stage;

pub use error::{ParleyError, Result};
