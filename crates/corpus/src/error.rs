use thiserror::Error;

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("failed to read corpus entry {path}: {source}")]
    Read { path: String, #[source] source: std::io::Error },

    #[error("failed to write corpus entry {path}: {source}")]
    Write { path: String, #[source] source: std::io::Error },

    #[error("failed to parse corpus entry {path}: {source}")]
    Parse { path: String, #[source] source: serde_json::Error },

    #[error("replay failed while pruning or cleaning: {0}")]
    Replay(String),
}
