use thiserror::Error;

use tabula_core::TabulaError;

/// Synchronous request rejections from a [`ConnectionSession`](crate::ConnectionSession).
///
/// Failures of the request itself arrive later as session events.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("session is busy with {0}")]
    Busy(&'static str),

    #[error("session is not connected")]
    NotConnected,

    #[error("no table selected")]
    NoTableSelected,

    #[error("worker has stopped")]
    WorkerGone,

    #[error(transparent)]
    Source(#[from] TabulaError),
}
