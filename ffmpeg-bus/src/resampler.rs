use ffmpeg_next::{ChannelLayout, format::Sample, frame::Audio, software::resampling};

/// Converts decoded audio to the encoder's sample format, layout and rate.
pub struct Resampler {
    context: resampling::Context,
    source: (Sample, ChannelLayout, u32),
}

impl Resampler {
    pub fn new(
        source: &Audio,
        format: Sample,
        layout: ChannelLayout,
        rate: u32,
    ) -> Result<Self, ffmpeg_next::Error> {
        let source_layout = source_layout(source);
        let context = resampling::Context::get(
            source.format(),
            source_layout,
            source.rate(),
            format,
            layout,
            rate,
        )?;
        Ok(Self {
            context,
            source: (source.format(), source_layout, source.rate()),
        })
    }

    pub fn matches(&self, frame: &Audio) -> bool {
        self.source == (frame.format(), source_layout(frame), frame.rate())
    }

    pub fn run(&mut self, frame: &Audio) -> Result<Audio, ffmpeg_next::Error> {
        let mut converted = Audio::empty();
        self.context.run(frame, &mut converted)?;
        Ok(converted)
    }
}

// Some demuxers leave the layout mask unset and only report a channel count.
fn source_layout(frame: &Audio) -> ChannelLayout {
    let layout = frame.channel_layout();
    if layout.is_empty() {
        ChannelLayout::default(frame.channels() as i32)
    } else {
        layout
    }
}

unsafe impl Send for Resampler {}
