use thiserror::Error;

#[derive(Error, Debug)]
pub enum CovDeltaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed coverage profile at line {line}: {message}")]
    Profile { line: usize, message: String },

    #[error("Failed to parse Go source: {0}")]
    GoParse(String),
}

pub type Result<T> = std::result::Result<T, CovDeltaError>;
