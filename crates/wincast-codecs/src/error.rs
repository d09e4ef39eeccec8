use thiserror::Error;

/// Failures from constructing or running a still/CSC/video encoder.
/// Per the pipeline's error handling design, none of these propagate past
/// [`crate::EncodingSelector`]/[`crate::VideoPipeline`]'s public entry
/// points - callers catch them, log, and fall through to the next
/// candidate or drop the frame.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("no encoder in the registry can handle {width}x{height} for encoding {encoding:?}")]
    NoCandidate { encoding: String, width: u32, height: u32 },

    #[error("csc conversion from {from} to {to} failed: {reason}")]
    CscFailed { from: String, to: String, reason: String },

    #[error("still encoder {encoding} failed: {reason}")]
    StillEncodeFailed { encoding: String, reason: String },

    #[error("video encoder setup failed: {reason}")]
    VideoSetupFailed { reason: String },

    #[error("video encoder failed to encode frame: {reason}")]
    VideoEncodeFailed { reason: String },

    #[error("pixel buffer too short: expected at least {expected} bytes, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, CodecError>;
