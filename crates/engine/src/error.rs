//! crates/engine/src/error.rs
//!
//! Error types for the recovery pipeline.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::controller::PreparedCallback;

/// Result type for pipeline construction.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while building a pipeline.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The requested field backend is unavailable on this platform.
    #[error(transparent)]
    Backend(#[from] gf16::BackendError),
    /// A stage thread could not be spawned.
    #[error("failed to spawn pipeline thread")]
    Spawn(#[source] io::Error),
}

/// Back-pressure signal from [`crate::Pipeline::add_input`].
///
/// Both staging areas are awaiting processing; the input buffer (and the
/// prepared-callback, if any) travel back to the caller, who re-submits
/// after consuming a completion event.
#[derive(Error)]
#[error("both staging areas are awaiting processing")]
pub struct RejectedInput {
    /// The input buffer, returned unconsumed.
    pub buffer: Vec<u8>,
    /// The prepared-callback that was attached to the submission.
    pub on_prepared: Option<PreparedCallback>,
}

impl fmt::Debug for RejectedInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RejectedInput")
            .field("buffer_len", &self.buffer.len())
            .field("has_callback", &self.on_prepared.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_is_transparent() {
        let err: EngineError = gf16::backend::create(gf16::Method::Shuffle)
            .map(|_| ())
            .unwrap_err()
            .into();
        assert!(err.to_string().contains("shuffle"));
    }

    #[test]
    fn rejected_input_returns_the_buffer() {
        let rejected = RejectedInput {
            buffer: vec![1, 2, 3],
            on_prepared: None,
        };
        assert_eq!(rejected.buffer, vec![1, 2, 3]);
        assert!(rejected.to_string().contains("staging areas"));
        assert!(format!("{rejected:?}").contains("buffer_len"));
    }
}
