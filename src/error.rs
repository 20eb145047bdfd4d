use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Ladder(#[from] ladder::LadderError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{path}:{line}: invalid request: {source}")]
    Script {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("replay interrupted")]
    Interrupted,
}

pub type Result<T> = std::result::Result<T, AppError>;
