use bytes::Bytes;
use ffmpeg_next::{
    ChannelLayout, Dictionary, Rational,
    codec::packet::Packet,
    format::{Pixel, Sample, sample},
    frame, picture,
};

use crate::{
    PipelineError,
    buffer::{EncodedBuffer, MediaKind, duration_from_ticks},
    description::{AudioEncodeConfig, VideoEncodeConfig},
    resampler::Resampler,
    scaler::Scaler,
    stream::AvStream,
};

const VIDEO_PIXEL_FORMAT: Pixel = Pixel::YUV420P;
const AUDIO_SAMPLE_FORMAT: Sample = Sample::I16(sample::Type::Packed);

fn find_encoder(element: &str, name: &str) -> Result<ffmpeg_next::Codec, PipelineError> {
    ffmpeg_next::encoder::find_by_name(name)
        .ok_or_else(|| PipelineError::resolve(element, format!("encoder {} not found", name)))
}

/// Drain every packet the encoder has ready. `fallback_ticks` is used when the
/// encoder leaves the packet duration unset.
fn drain_packets(
    encoder: &mut ffmpeg_next::codec::encoder::Encoder,
    kind: MediaKind,
    time_base: Rational,
    fallback_ticks: i64,
    out: &mut Vec<EncodedBuffer>,
) -> Result<(), ffmpeg_next::Error> {
    loop {
        let mut packet = Packet::empty();
        match encoder.receive_packet(&mut packet) {
            Ok(()) => {
                let ticks = if packet.duration() > 0 {
                    packet.duration()
                } else {
                    fallback_ticks
                };
                let data = packet.data().map(Bytes::copy_from_slice).unwrap_or_default();
                out.push(EncodedBuffer::new(
                    kind,
                    data,
                    duration_from_ticks(ticks, time_base),
                ));
            }
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
                return Ok(());
            }
            Err(ffmpeg_next::Error::Eof) => return Ok(()),
            Err(err) => return Err(err),
        }
    }
}

/// VP8 (by default) encoder for the video track.
pub struct VideoEncoder {
    inner: ffmpeg_next::codec::encoder::Video,
    time_base: Rational,
    width: u32,
    height: u32,
    scaler: Option<Scaler>,
    frame_index: i64,
}

impl VideoEncoder {
    pub fn new(stream: &AvStream, config: &VideoEncodeConfig) -> Result<Self, PipelineError> {
        let element = format!("video encoder {}", config.codec);
        let codec = find_encoder(&element, &config.codec)?;
        let (width, height) = config
            .size
            .unwrap_or((stream.width(), stream.height()));
        if width == 0 || height == 0 {
            return Err(PipelineError::resolve(
                element,
                "source size unknown, set video.size",
            ));
        }

        let frame_rate = stream.frame_rate();
        let time_base = frame_rate.invert();
        let mut encoder = ffmpeg_next::codec::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|e| PipelineError::resolve(&element, e))?;
        encoder.set_width(width);
        encoder.set_height(height);
        encoder.set_format(VIDEO_PIXEL_FORMAT);
        encoder.set_frame_rate(Some(frame_rate));
        encoder.set_time_base(time_base);
        encoder.set_bit_rate(config.bitrate);
        encoder.set_gop(config.keyframe_interval);

        let mut opts = Dictionary::new();
        opts.set("deadline", &config.deadline);
        // live source: no look-ahead
        opts.set("lag-in-frames", "0");
        opts.set("cpu-used", "8");
        let inner = encoder
            .open_with(opts)
            .map_err(|e| PipelineError::resolve(&element, e))?;
        log::info!(
            "video encoder opened: {} {}x{} @ {} fps",
            config.codec,
            width,
            height,
            frame_rate
        );

        Ok(Self {
            inner,
            time_base,
            width,
            height,
            scaler: None,
            frame_index: 0,
        })
    }

    pub fn encode(&mut self, frame: &frame::Video) -> Result<Vec<EncodedBuffer>, ffmpeg_next::Error> {
        let mut picture = if frame.format() != VIDEO_PIXEL_FORMAT
            || frame.width() != self.width
            || frame.height() != self.height
        {
            let mut scaler = match self.scaler.take() {
                Some(scaler) if scaler.matches(frame) => scaler,
                _ => Scaler::new(frame, VIDEO_PIXEL_FORMAT, self.width, self.height)?,
            };
            let converted = scaler.run(frame);
            self.scaler = Some(scaler);
            converted?
        } else {
            frame.clone()
        };

        // Source timestamps jump on retune; the encoder gets a steady clock.
        picture.set_pts(Some(self.frame_index));
        picture.set_kind(picture::Type::None);
        self.frame_index += 1;
        self.inner.send_frame(&picture)?;

        let mut out = Vec::new();
        drain_packets(&mut self.inner, MediaKind::Video, self.time_base, 1, &mut out)?;
        Ok(out)
    }

    pub fn flush(&mut self) -> Result<Vec<EncodedBuffer>, ffmpeg_next::Error> {
        self.inner.send_eof()?;
        let mut out = Vec::new();
        drain_packets(&mut self.inner, MediaKind::Video, self.time_base, 1, &mut out)?;
        Ok(out)
    }
}

/// Opus (by default) encoder for the audio track. Decoded audio is
/// resampled to interleaved s16 and regrouped into the fixed frame size the
/// encoder asks for.
pub struct AudioEncoder {
    inner: ffmpeg_next::codec::encoder::Audio,
    layout: ChannelLayout,
    rate: u32,
    frame_size: usize,
    bytes_per_sample: usize,
    resampler: Option<Resampler>,
    pending: Vec<u8>,
    pts: i64,
}

impl AudioEncoder {
    pub fn new(config: &AudioEncodeConfig) -> Result<Self, PipelineError> {
        let element = format!("audio encoder {}", config.codec);
        let codec = find_encoder(&element, &config.codec)?;
        let layout = ChannelLayout::default(config.channels as i32);

        let mut encoder = ffmpeg_next::codec::Context::new_with_codec(codec)
            .encoder()
            .audio()
            .map_err(|e| PipelineError::resolve(&element, e))?;
        encoder.set_rate(config.sample_rate as i32);
        encoder.set_channel_layout(layout);
        encoder.set_format(AUDIO_SAMPLE_FORMAT);
        encoder.set_bit_rate(config.bitrate);
        encoder.set_time_base(Rational::new(1, config.sample_rate as i32));
        let inner = encoder
            .open_with(Dictionary::new())
            .map_err(|e| PipelineError::resolve(&element, e))?;

        // 20ms when the codec accepts any frame size
        let frame_size = match inner.frame_size() {
            0 => config.sample_rate as usize / 50,
            n => n as usize,
        };
        log::info!(
            "audio encoder opened: {} {} Hz, {} channels, frame size {}",
            config.codec,
            config.sample_rate,
            config.channels,
            frame_size
        );

        Ok(Self {
            inner,
            layout,
            rate: config.sample_rate,
            frame_size,
            bytes_per_sample: AUDIO_SAMPLE_FORMAT.bytes() * config.channels as usize,
            resampler: None,
            pending: Vec::new(),
            pts: 0,
        })
    }

    fn time_base(&self) -> Rational {
        Rational::new(1, self.rate as i32)
    }

    pub fn encode(&mut self, frame: &frame::Audio) -> Result<Vec<EncodedBuffer>, ffmpeg_next::Error> {
        let mut resampler = match self.resampler.take() {
            Some(resampler) if resampler.matches(frame) => resampler,
            _ => Resampler::new(frame, AUDIO_SAMPLE_FORMAT, self.layout, self.rate)?,
        };
        let converted = resampler.run(frame);
        self.resampler = Some(resampler);
        let converted = converted?;

        let len = converted.samples() * self.bytes_per_sample;
        let plane = converted.data(0);
        self.pending.extend_from_slice(&plane[..len.min(plane.len())]);

        let mut out = Vec::new();
        let time_base = self.time_base();
        let chunk_len = self.frame_size * self.bytes_per_sample;
        while self.pending.len() >= chunk_len {
            let mut chunk = frame::Audio::new(AUDIO_SAMPLE_FORMAT, self.frame_size, self.layout);
            chunk.set_rate(self.rate);
            chunk.set_pts(Some(self.pts));
            chunk.data_mut(0)[..chunk_len].copy_from_slice(&self.pending[..chunk_len]);
            self.pending.drain(..chunk_len);
            self.pts += self.frame_size as i64;

            self.inner.send_frame(&chunk)?;
            drain_packets(
                &mut self.inner,
                MediaKind::Audio,
                time_base,
                self.frame_size as i64,
                &mut out,
            )?;
        }
        Ok(out)
    }

    /// Flush the encoder. A trailing partial frame is discarded.
    pub fn flush(&mut self) -> Result<Vec<EncodedBuffer>, ffmpeg_next::Error> {
        self.pending.clear();
        self.inner.send_eof()?;
        let time_base = self.time_base();
        let mut out = Vec::new();
        drain_packets(
            &mut self.inner,
            MediaKind::Audio,
            time_base,
            self.frame_size as i64,
            &mut out,
        )?;
        Ok(out)
    }
}
