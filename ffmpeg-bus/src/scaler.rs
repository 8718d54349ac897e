use ffmpeg_next::{format::Pixel, frame::Video, software::scaling};

/// Converts decoded pictures to the encoder's pixel format and size. Rebuilt
/// when the source geometry changes mid-stream (broadcast resolution switches).
pub struct Scaler {
    context: scaling::Context,
    source: (Pixel, u32, u32),
}

impl Scaler {
    pub fn new(source: &Video, format: Pixel, width: u32, height: u32) -> Result<Self, ffmpeg_next::Error> {
        let context = scaling::Context::get(
            source.format(),
            source.width(),
            source.height(),
            format,
            width,
            height,
            scaling::Flags::BILINEAR,
        )?;
        Ok(Self {
            context,
            source: (source.format(), source.width(), source.height()),
        })
    }

    pub fn matches(&self, frame: &Video) -> bool {
        self.source == (frame.format(), frame.width(), frame.height())
    }

    pub fn run(&mut self, frame: &Video) -> Result<Video, ffmpeg_next::Error> {
        let mut converted = Video::empty();
        self.context.run(frame, &mut converted)?;
        converted.set_pts(frame.pts());
        Ok(converted)
    }
}

unsafe impl Send for Scaler {}
