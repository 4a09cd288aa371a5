mod model;
mod repository;

pub use model::{ConsentDecision, ConsentRecord, ConsentTarget};
pub use repository::ConsentRepository;
