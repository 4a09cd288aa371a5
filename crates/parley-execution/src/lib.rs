//! Runtime services: detached job execution and tracing setup.

pub mod background;
pub mod capture;
pub mod telemetry;

pub use background::{BackgroundExecutor, JobContext, JobFailure};
pub use capture::{CaptureLayer, CapturedEvent};
pub use telemetry::init_tracing;
