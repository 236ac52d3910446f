use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoverageError {
    #[error("program counter {pc} out of bounds for code of length {len}")]
    PcOutOfBounds { pc: usize, len: usize },
}
