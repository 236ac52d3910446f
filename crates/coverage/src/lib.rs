//! Code-hash-keyed coverage bitmaps and the per-execution tracer that fills them.

pub mod error;
pub mod hash;
pub mod map;
pub mod tracer;

pub use error::CoverageError;
pub use hash::resolve_code_hash;
pub use map::{CoverageMap, CoverageMaps};
pub use tracer::{CoverageTracer, StepHook};
