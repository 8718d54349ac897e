use std::{fmt, time::Duration};

use bytes::Bytes;
use ffmpeg_next::Rational;

/// Which of the two output streams a buffer belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of compressed output handed from the pipeline to its sink.
///
/// `duration` is `None` when the encoder reported a zero, negative or
/// missing duration.
#[derive(Clone, Debug)]
pub struct EncodedBuffer {
    pub kind: MediaKind,
    pub data: Bytes,
    pub duration: Option<Duration>,
}

impl EncodedBuffer {
    pub fn new(kind: MediaKind, data: Bytes, duration: Option<Duration>) -> Self {
        Self {
            kind,
            data,
            duration,
        }
    }
}

/// Receives encoded buffers from the pipeline worker threads.
///
/// Implementations are called from threads owned by the pipeline and must
/// return quickly: blocking here stalls the live source.
pub trait BufferSink: Send + Sync {
    fn on_buffer(&self, buffer: EncodedBuffer);
}

/// Convert a tick count in `time_base` units into wall-clock time.
pub fn duration_from_ticks(ticks: i64, time_base: Rational) -> Option<Duration> {
    let num = time_base.numerator();
    let den = time_base.denominator();
    if ticks <= 0 || num <= 0 || den <= 0 {
        return None;
    }
    let nanos = ticks as i128 * num as i128 * 1_000_000_000 / den as i128;
    u64::try_from(nanos).ok().map(Duration::from_nanos)
}
