use thiserror::Error;

use crate::filter::FilterError;

/// Reasons [`open`](super::CaptureFilterPipeline::open) can fail. The
/// pipeline is back in the closed state whenever one of these is returned.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline is already open")]
    AlreadyOpen,

    #[error("no input driver named {0:?}")]
    DeviceNotFound(String),

    #[error("failed to open {device:?} with {driver}: {reason}")]
    DeviceOpenFailed {
        driver: String,
        device: String,
        reason: String,
    },

    #[error("{device:?} has no video stream")]
    NoVideoTrack { device: String },

    #[error("no decoder for codec {0}")]
    DecoderUnavailable(String),

    #[error("failed to open {codec} decoder: {reason}")]
    DecoderOpenFailed { codec: String, reason: String },

    #[error("allocation failed: {0}")]
    AllocationFailed(String),

    #[error("invalid filter graph: {0}")]
    FilterGraphInvalid(#[from] FilterError),
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Full report of an eyre error, including its causes, on one line
pub(crate) fn reason(err: &color_eyre::Report) -> String {
    format!("{:#}", err)
}
