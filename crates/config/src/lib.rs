//! Fuzzer configuration: every knob enumerated in `spec.md` §6, grouped into nested sections.
//!
//! Parsing a config file or CLI flags into this struct is out of scope (`spec.md` §1); this
//! crate only owns the validated, in-memory shape the core consumes.

pub mod config;
pub mod error;

pub use config::{
    AssertionTestConfig, ConstructorArgValue, CorpusConfig, FuzzerConfig, PanicCodeConfig,
    PropertyTestConfig, Verbosity, WorkerConfig,
};
pub use error::ConfigError;
