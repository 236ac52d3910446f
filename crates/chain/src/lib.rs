//! Core data model and chain abstractions the fuzzing engine is built against.
//!
//! Everything here is a plain data type or a trait; no concrete VM, compiler, or persistence
//! lives in this crate (those are external collaborators per `spec.md` §1).

pub mod chain;
pub mod error;
pub mod event;
pub mod model;

pub use chain::TestChain;
pub use error::ChainError;
pub use event::{Event, EventBus, SubscriberError};
pub use model::{
    CallMessage, CallSequence, CallSequenceElement, ChainReference, ContractDefinition,
    DeployedContract, MessageResult, MethodClassification, PanicCode,
};
