//! Persistent, weighted set of interesting call sequences plus the global coverage map.

pub mod corpus;
pub mod entry;
pub mod error;

pub use corpus::{CleanReport, Corpus};
pub use entry::{sequence_from_json, sequence_to_json, CorpusEntry};
pub use error::CorpusError;
