//! Scripted in-memory test chain and fixture builders, for exercising the engine without a
//! real VM.

pub mod fake_chain;
pub mod fixtures;
pub mod init;

pub use fake_chain::FakeChain;
pub use fixtures::sample_contract_definition;
pub use init::init_tracing;
