use std::io;

use thiserror::Error;

/// Failure delivered to a completion handler.
#[derive(Error, Debug)]
pub enum IoFailure {
    /// The operation was cancelled because its socket (or the runtime)
    /// was closed. Not a transport error; completion handlers swallow
    /// it silently.
    #[error("operation aborted")]
    Aborted,
    #[error(transparent)]
    Os(#[from] io::Error),
}

impl IoFailure {
    #[inline]
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}
