use std::ffi::CString;
use std::path::Path;

use ffmpeg_next::{Dictionary, codec::packet::Packet, media};

use crate::{PipelineError, buffer::MediaKind, stream::AvStream};

/// Demuxer for the pipeline source.
pub struct AvInput {
    inner: ffmpeg_next::format::context::Input,
    url: String,
}

impl AvInput {
    /// Resolve input format by name (e.g. "mpegts", "v4l2") via FFmpeg's av_find_input_format.
    fn find_input_format(name: &str) -> Result<ffmpeg_next::format::format::Input, PipelineError> {
        let cname = CString::new(name)
            .map_err(|e| PipelineError::resolve(format!("format {:?}", name), e))?;
        let ptr = unsafe { ffmpeg_next::ffi::av_find_input_format(cname.as_ptr()) };
        if ptr.is_null() {
            return Err(PipelineError::resolve(
                format!("format {:?}", name),
                "input format not found",
            ));
        }
        Ok(unsafe { ffmpeg_next::format::format::Input::wrap(ptr as *mut _) })
    }

    pub fn open(
        url: &str,
        format: Option<&str>,
        options: Option<Dictionary>,
    ) -> Result<Self, PipelineError> {
        use ffmpeg_next::format::format::Format;

        let path = Path::new(url);
        let opened = match format {
            Some(fmt_name) => {
                let fmt = Self::find_input_format(fmt_name)?;
                ffmpeg_next::format::open_with(
                    path,
                    &Format::Input(fmt),
                    options.unwrap_or_default(),
                )
                .map(|ctx| ctx.input())
            }
            None => match options {
                Some(opts) => ffmpeg_next::format::input_with_dictionary(path, opts),
                None => ffmpeg_next::format::input(path),
            },
        };
        let inner = opened.map_err(|e| PipelineError::resolve(format!("input {:?}", url), e))?;

        Ok(Self {
            inner,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Pick the stream feeding the `kind` output. With a program number only
    /// that program's streams are considered (MPEG-TS multiplexes carry
    /// several channels).
    pub fn find_stream(
        &self,
        kind: MediaKind,
        program: Option<i32>,
    ) -> Result<AvStream, PipelineError> {
        let medium = match kind {
            MediaKind::Video => media::Type::Video,
            MediaKind::Audio => media::Type::Audio,
        };
        let found = match program {
            Some(number) => {
                let indices = self.program_streams(number).ok_or_else(|| {
                    PipelineError::resolve(
                        format!("program {}", number),
                        format!("not present in {}", self.url),
                    )
                })?;
                indices
                    .into_iter()
                    .filter_map(|index| self.inner.stream(index))
                    .find(|s| s.parameters().medium() == medium)
                    .map(AvStream::from)
            }
            None => self.inner.streams().best(medium).map(AvStream::from),
        };
        found.ok_or_else(|| {
            PipelineError::resolve(
                format!("{} stream", kind),
                format!("no {} stream in {}", kind, self.url),
            )
        })
    }

    /// Stream indices belonging to MPEG-TS program `number`.
    fn program_streams(&self, number: i32) -> Option<Vec<usize>> {
        unsafe {
            let ctx = self.inner.as_ptr();
            let programs = (*ctx).programs;
            if programs.is_null() {
                return None;
            }
            (0..(*ctx).nb_programs as usize)
                .map(|i| *programs.add(i))
                .find(|p| !p.is_null() && (**p).id == number)
                .map(|p| {
                    (0..(**p).nb_stream_indexes as usize)
                        .map(|i| *(**p).stream_index.add(i) as usize)
                        .collect()
                })
        }
    }

    /// Next demuxed packet with its stream index, `None` at end of stream.
    pub fn read_packet(&mut self) -> Option<(usize, Packet)> {
        self.inner
            .packets()
            .next()
            .map(|(stream, packet)| (stream.index(), packet))
    }
}
