//! Error taxonomy of the playback core.
//!
//! Only `SourceUnavailable` is meant to reach the host as a hard failure
//! (it may abort opening a file). The other variants describe conditions the
//! core recovers from locally: a frame is skipped, playback pauses, or a
//! request is rejected without touching state.

use crate::core::source::StreamId;

/// Playback core errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlaybackError {
    /// Device or file never opened, or closed while in use
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// A single frame failed to read
    #[error("{stream} frame {index} failed to decode: {reason}")]
    DecodeFailure {
        stream: StreamId,
        index: usize,
        reason: String,
    },

    /// Depth and color disagree on the outcome for the same index
    #[error("depth and color streams out of sync at frame {index}")]
    StreamDesync { index: usize },

    /// Position or frame outside the valid range
    #[error("{value} is outside the valid range [0, {max}]")]
    OutOfRange { value: f64, max: f64 },
}

pub type Result<T> = std::result::Result<T, PlaybackError>;
