use thiserror::Error;

use tabula_connector::SessionError;
use tabula_core::TabulaError;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("invalid import specification: {0}")]
    Specification(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Source(#[from] TabulaError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl From<serde_json::Error> for ImportError {
    fn from(e: serde_json::Error) -> Self {
        ImportError::Specification(e.to_string())
    }
}
