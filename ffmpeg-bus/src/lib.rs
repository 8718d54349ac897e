/// Registers FFmpeg components (formats, devices, codecs). Safe to call more
/// than once; the pipeline calls it before opening its input.
pub fn init() -> Result<(), PipelineError> {
    ffmpeg_next::init().map_err(PipelineError::Ffmpeg)
}

/// Everything that can stop a pipeline from being built or started.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("malformed pipeline description: {0}")]
    Description(String),
    #[error("cannot resolve {element}: {reason}")]
    Resolve { element: String, reason: String },
    #[error("pipeline already started")]
    AlreadyStarted,
    #[error("ffmpeg: {0}")]
    Ffmpeg(#[from] ffmpeg_next::Error),
    #[error("spawn pipeline thread: {0}")]
    Thread(#[from] std::io::Error),
}

impl PipelineError {
    pub(crate) fn resolve(element: impl Into<String>, reason: impl ToString) -> Self {
        Self::Resolve {
            element: element.into(),
            reason: reason.to_string(),
        }
    }
}

pub mod buffer;
pub mod decoder;
pub mod description;
pub mod encoder;
pub mod input;
pub mod pipeline;
pub mod resampler;
pub mod scaler;
pub mod stream;
