use ffmpeg_next::{Rational, codec::packet::Packet};

use crate::{PipelineError, stream::AvStream};

pub enum DecodedFrame {
    Video(ffmpeg_next::frame::Video),
    Audio(ffmpeg_next::frame::Audio),
}

enum DecoderType {
    Video(ffmpeg_next::codec::decoder::Video),
    Audio(ffmpeg_next::codec::decoder::Audio),
}

pub struct Decoder {
    stream: AvStream,
    inner: DecoderType,
    decoder_time_base: Rational,
}

impl Decoder {
    pub fn new(stream: &AvStream) -> Result<Self, PipelineError> {
        let element = format!("decoder for stream {}", stream.index());
        let mut decoder_ctx = ffmpeg_next::codec::Context::new();
        unsafe {
            (*decoder_ctx.as_mut_ptr()).time_base = stream.time_base().into();
        }
        decoder_ctx
            .set_parameters(stream.parameters().clone())
            .map_err(|e| PipelineError::resolve(&element, e))?;

        let (inner, decoder_time_base) = if stream.parameters().medium()
            == ffmpeg_next::media::Type::Video
        {
            let video_decoder = decoder_ctx
                .decoder()
                .video()
                .map_err(|e| PipelineError::resolve(&element, e))?;
            let time_base = video_decoder.time_base();
            (DecoderType::Video(video_decoder), time_base)
        } else if stream.parameters().medium() == ffmpeg_next::media::Type::Audio {
            let audio_decoder = decoder_ctx
                .decoder()
                .audio()
                .map_err(|e| PipelineError::resolve(&element, e))?;
            let time_base = audio_decoder.time_base();
            (DecoderType::Audio(audio_decoder), time_base)
        } else {
            return Err(PipelineError::resolve(element, "unsupported stream type"));
        };

        Ok(Self {
            stream: stream.clone(),
            inner,
            decoder_time_base,
        })
    }

    pub fn stream_index(&self) -> usize {
        self.stream.index()
    }

    pub fn send_packet(&mut self, mut packet: Packet) -> Result<(), ffmpeg_next::Error> {
        packet.rescale_ts(self.stream.time_base(), self.decoder_time_base);
        match &mut self.inner {
            DecoderType::Video(decoder) => decoder.send_packet(&packet),
            DecoderType::Audio(decoder) => decoder.send_packet(&packet),
        }
    }

    pub fn send_eof(&mut self) -> Result<(), ffmpeg_next::Error> {
        match &mut self.inner {
            DecoderType::Video(decoder) => decoder.send_eof(),
            DecoderType::Audio(decoder) => decoder.send_eof(),
        }
    }

    /// Next decoded frame, `None` when the decoder needs more input.
    pub fn receive_frame(&mut self) -> Result<Option<DecodedFrame>, ffmpeg_next::Error> {
        let result = match &mut self.inner {
            DecoderType::Video(decoder) => {
                let mut frame = ffmpeg_next::frame::Video::empty();
                decoder
                    .receive_frame(&mut frame)
                    .map(|()| DecodedFrame::Video(frame))
            }
            DecoderType::Audio(decoder) => {
                let mut frame = ffmpeg_next::frame::Audio::empty();
                decoder
                    .receive_frame(&mut frame)
                    .map(|()| DecodedFrame::Audio(frame))
            }
        };

        match result {
            Ok(frame) => Ok(Some(frame)),
            Err(ffmpeg_next::Error::Eof) => Ok(None),
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}
