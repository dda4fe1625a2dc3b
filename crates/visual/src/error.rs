use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VisualError {
    #[error("got {graphs} graphs but {titles} titles")]
    LengthMismatch { graphs: usize, titles: usize },

    #[error("failed to serialize visual spec: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
