use covfuzz_chain::ChainError;
use covfuzz_corpus::CorpusError;
use thiserror::Error;

/// Worker/engine-level errors. Per `spec.md` §7, chain errors and corpus I/O errors are fatal
/// for the worker that hit them; a provider's verifier/finished-callback error is likewise fatal.
/// Cancellation is not an error (`spec.md` §7) — it is represented as a distinct control-flow
/// outcome on `FuzzerWorker::run`, not as an `EngineError` variant.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Corpus(#[from] CorpusError),

    #[error("test-case provider failed: {0}")]
    Provider(String),
}
