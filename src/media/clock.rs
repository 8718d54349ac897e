//! Wall-clock duration to track clock units.

use std::time::Duration;

use ffmpeg_bus::buffer::MediaKind;

pub const VIDEO_CLOCK_RATE: u32 = 90000;
pub const AUDIO_CLOCK_RATE: u32 = 48000;

const NANOS_PER_SEC: u128 = 1_000_000_000;

pub fn clock_rate(kind: MediaKind) -> u32 {
    match kind {
        MediaKind::Video => VIDEO_CLOCK_RATE,
        MediaKind::Audio => AUDIO_CLOCK_RATE,
    }
}

/// `round(clock_rate * duration / 1s)`, rounding halves up. Saturates at
/// `u32::MAX`.
pub fn samples(duration: Duration, clock_rate: u32) -> u32 {
    let scaled = clock_rate as u128 * duration.as_nanos();
    let rounded = (scaled + NANOS_PER_SEC / 2) / NANOS_PER_SEC;
    u32::try_from(rounded).unwrap_or(u32::MAX)
}

/// Samples for a buffer whose duration may be unknown; unknown counts as zero.
pub fn samples_or_zero(duration: Option<Duration>, clock_rate: u32) -> u32 {
    duration.map_or(0, |d| samples(d, clock_rate))
}

/// Smallest duration that converts back to exactly `samples` under a
/// truncating `(secs * clock_rate) as u32`, which is what the RTP packetizer
/// does.
pub fn duration_for(samples: u32, clock_rate: u32) -> Duration {
    if clock_rate == 0 {
        return Duration::ZERO;
    }
    let nanos = (samples as u128 * NANOS_PER_SEC).div_ceil(clock_rate as u128);
    Duration::from_nanos(nanos as u64)
}
