//! Textual pipeline description.
//!
//! A description is a list of whitespace separated `key=value` tokens. Lines
//! starting with `#` are ignored, so descriptions can be kept in files:
//!
//! ```text
//! input=/dev/dvb/adapter0/dvr0 format=mpegts program=3
//! video.size=853x480 video.codec=libvpx
//! audio.rate=48000 audio.bitrate=128000
//! ```

use std::str::FromStr;

use crate::PipelineError;

/// Over-the-air ATSC capture, pre-tuned to KCTS 9 (program 3).
pub const DEFAULT_DESCRIPTION: &str = "\
input=/dev/dvb/adapter0/dvr0 format=mpegts program=3
video.codec=libvpx video.size=853x480 video.deadline=realtime
audio.codec=libopus audio.rate=48000 audio.bitrate=128000
queue.max-buffers=256";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoEncodeConfig {
    pub codec: String,
    // None = keep source size
    pub size: Option<(u32, u32)>,
    // bps
    pub bitrate: usize,
    pub keyframe_interval: u32,
    // libvpx "deadline": realtime, good, best
    pub deadline: String,
}

impl Default for VideoEncodeConfig {
    fn default() -> Self {
        Self {
            codec: "libvpx".to_string(),
            size: None,
            bitrate: 1_000_000,
            keyframe_interval: 60,
            deadline: "realtime".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioEncodeConfig {
    pub codec: String,
    pub sample_rate: u32,
    pub channels: u16,
    // bps
    pub bitrate: usize,
}

impl Default for AudioEncodeConfig {
    fn default() -> Self {
        Self {
            codec: "libopus".to_string(),
            sample_rate: 48000,
            channels: 2,
            bitrate: 128_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineDescription {
    pub input: String,
    pub format: Option<String>,
    pub program: Option<i32>,
    pub input_options: Vec<(String, String)>,
    pub video: VideoEncodeConfig,
    pub audio: AudioEncodeConfig,
    /// Per-stream bound of the leaky hand-off between demuxer and transcoders.
    pub max_queue_buffers: usize,
}

impl PipelineDescription {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            format: None,
            program: None,
            input_options: Vec::new(),
            video: VideoEncodeConfig::default(),
            audio: AudioEncodeConfig::default(),
            max_queue_buffers: 256,
        }
    }

    pub fn input_options(&self) -> Option<ffmpeg_next::Dictionary<'static>> {
        if self.input_options.is_empty() {
            return None;
        }
        let mut dict = ffmpeg_next::Dictionary::new();
        for (key, value) in &self.input_options {
            dict.set(key, value);
        }
        Some(dict)
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<(), PipelineError> {
        match key {
            "input" => self.input = value.to_string(),
            "format" => self.format = Some(value.to_string()),
            "program" => self.program = Some(parse_number(key, value)?),
            "video.codec" => self.video.codec = value.to_string(),
            "video.size" => self.video.size = Some(parse_size(value)?),
            "video.bitrate" => self.video.bitrate = parse_number(key, value)?,
            "video.keyint" => self.video.keyframe_interval = parse_number(key, value)?,
            "video.deadline" => self.video.deadline = value.to_string(),
            "audio.codec" => self.audio.codec = value.to_string(),
            "audio.rate" => self.audio.sample_rate = parse_number(key, value)?,
            "audio.channels" => self.audio.channels = parse_number(key, value)?,
            "audio.bitrate" => self.audio.bitrate = parse_number(key, value)?,
            "queue.max-buffers" => self.max_queue_buffers = parse_number(key, value)?,
            _ => match key.strip_prefix("opt.") {
                Some(name) if !name.is_empty() => {
                    self.input_options
                        .push((name.to_string(), value.to_string()));
                }
                _ => {
                    return Err(PipelineError::Description(format!(
                        "unknown key {:?}",
                        key
                    )));
                }
            },
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), PipelineError> {
        if self.input.is_empty() {
            return Err(PipelineError::Description("input is required".to_string()));
        }
        if self.audio.sample_rate == 0 || self.audio.channels == 0 {
            return Err(PipelineError::Description(
                "audio.rate and audio.channels must be positive".to_string(),
            ));
        }
        if self.max_queue_buffers == 0 {
            return Err(PipelineError::Description(
                "queue.max-buffers must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl FromStr for PipelineDescription {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut description = PipelineDescription::new("");
        let tokens = s
            .lines()
            .map(str::trim)
            .filter(|line| !line.starts_with('#'))
            .flat_map(str::split_whitespace);
        for token in tokens {
            let (key, value) = token.split_once('=').ok_or_else(|| {
                PipelineError::Description(format!("expected key=value, got {:?}", token))
            })?;
            if value.is_empty() {
                return Err(PipelineError::Description(format!(
                    "empty value for {:?}",
                    key
                )));
            }
            description.apply(key, value)?;
        }
        description.validate()?;
        Ok(description)
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, PipelineError> {
    value
        .parse()
        .map_err(|_| PipelineError::Description(format!("invalid number for {}: {:?}", key, value)))
}

fn parse_size(value: &str) -> Result<(u32, u32), PipelineError> {
    let invalid = || PipelineError::Description(format!("invalid video.size {:?}", value));
    let (w, h) = value.split_once('x').ok_or_else(invalid)?;
    let w: u32 = w.parse().map_err(|_| invalid())?;
    let h: u32 = h.parse().map_err(|_| invalid())?;
    if w == 0 || h == 0 {
        return Err(invalid());
    }
    Ok((w, h))
}

#[cfg(test)]
#[path = "description_test.rs"]
mod description_test;
