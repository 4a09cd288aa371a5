//! Share offer domain module.

mod model;
mod repository;

pub use model::{DeliveryStatus, ShareOffer, ShareOfferStatus, ShareResponse};
pub use repository::ShareOfferRepository;
