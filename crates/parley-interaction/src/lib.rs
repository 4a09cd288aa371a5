//! Implementations of the judgment capability.
//!
//! - [`LexiconJudge`]: offline, vocabulary based
//! - [`HttpJudge`]: delegates to a remote JSON endpoint

pub mod http_judge;
pub mod lexicon_judge;

pub use http_judge::HttpJudge;
pub use lexicon_judge::LexiconJudge;
