//! Call-sequence generation, shrinking, test-case providers, and worker/fuzzer orchestration.

pub mod error;
pub mod fuzzer;
pub mod provider;
pub mod report;
pub mod sequence_generator;
pub mod shrinker;
pub mod worker;

pub use error::EngineError;
pub use fuzzer::{Fuzzer, FuzzerOutcome};
pub use provider::{
    AssertionTestCaseProvider, PropertyTestCaseProvider, ShrinkCallSequenceRequest, TestCase, TestCaseProvider, TestCaseStatus,
    TestCaseTarget,
};
pub use report::FailureReport;
pub use sequence_generator::CallSequenceGenerator;
pub use shrinker::{shrink_argument_values, shrink_call_removal};
pub use worker::{FuzzerWorker, WorkerExit};
