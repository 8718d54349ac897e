//! The transcode pipeline.
//!
//! ```text
//!                         ┌─► [leaky queue] ─► pipeline-video: decode ─► scale ─► VP8  ─┐
//! pipeline-demux: read ───┤                                                             ├─► BufferSink
//!                         └─► [leaky queue] ─► pipeline-audio: decode ─► resample ─► Opus ─┘
//! ```
//!
//! Each stream is transcoded on its own thread, so buffers of one kind reach
//! the sink in production order while audio and video interleave freely.

use std::{
    sync::{
        Arc,
        mpsc::{Receiver, SyncSender, TrySendError, sync_channel},
    },
    thread::JoinHandle,
};

use ffmpeg_next::codec::packet::Packet;
use tokio_util::sync::CancellationToken;

use crate::{
    PipelineError,
    buffer::{BufferSink, EncodedBuffer, MediaKind},
    decoder::{DecodedFrame, Decoder},
    description::PipelineDescription,
    encoder::{AudioEncoder, VideoEncoder},
    input::AvInput,
};

/// Log "queue full" at most every N drops.
const DROP_LOG_INTERVAL: u64 = 120;

struct Parts {
    input: AvInput,
    video: StreamWorker,
    audio: StreamWorker,
    max_queue_buffers: usize,
}

struct StreamWorker {
    decoder: Decoder,
    encoder: StreamEncoder,
}

enum StreamEncoder {
    Video(VideoEncoder),
    Audio(AudioEncoder),
}

impl StreamEncoder {
    fn kind(&self) -> MediaKind {
        match self {
            StreamEncoder::Video(_) => MediaKind::Video,
            StreamEncoder::Audio(_) => MediaKind::Audio,
        }
    }

    fn encode(&mut self, frame: DecodedFrame) -> Result<Vec<EncodedBuffer>, ffmpeg_next::Error> {
        match (self, frame) {
            (StreamEncoder::Video(encoder), DecodedFrame::Video(frame)) => encoder.encode(&frame),
            (StreamEncoder::Audio(encoder), DecodedFrame::Audio(frame)) => encoder.encode(&frame),
            _ => Ok(Vec::new()),
        }
    }

    fn flush(&mut self) -> Result<Vec<EncodedBuffer>, ffmpeg_next::Error> {
        match self {
            StreamEncoder::Video(encoder) => encoder.flush(),
            StreamEncoder::Audio(encoder) => encoder.flush(),
        }
    }
}

/// Handle to the running transcode graph.
pub struct Pipeline {
    cancel: CancellationToken,
    parts: Option<Parts>,
    threads: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Open the input and resolve decoders and encoders. Nothing runs until
    /// [`Pipeline::start`].
    pub fn new(description: &PipelineDescription) -> Result<Self, PipelineError> {
        crate::init()?;

        let input = AvInput::open(
            &description.input,
            description.format.as_deref(),
            description.input_options(),
        )?;
        let video_stream = input.find_stream(MediaKind::Video, description.program)?;
        let audio_stream = input.find_stream(MediaKind::Audio, description.program)?;
        log::info!(
            "pipeline input {}: video stream {}, audio stream {}",
            input.url(),
            video_stream.index(),
            audio_stream.index()
        );

        let video = StreamWorker {
            decoder: Decoder::new(&video_stream)?,
            encoder: StreamEncoder::Video(VideoEncoder::new(&video_stream, &description.video)?),
        };
        let audio = StreamWorker {
            decoder: Decoder::new(&audio_stream)?,
            encoder: StreamEncoder::Audio(AudioEncoder::new(&description.audio)?),
        };

        Ok(Self {
            cancel: CancellationToken::new(),
            parts: Some(Parts {
                input,
                video,
                audio,
                max_queue_buffers: description.max_queue_buffers,
            }),
            threads: Vec::new(),
        })
    }

    /// Start the demux and transcode threads. Every encoded buffer is passed
    /// to `sink` from one of those threads.
    pub fn start(&mut self, sink: Arc<dyn BufferSink>) -> Result<(), PipelineError> {
        let parts = self.parts.take().ok_or(PipelineError::AlreadyStarted)?;
        let Parts {
            input,
            video,
            audio,
            max_queue_buffers,
        } = parts;

        let (video_tx, video_rx) = sync_channel::<Packet>(max_queue_buffers);
        let (audio_tx, audio_rx) = sync_channel::<Packet>(max_queue_buffers);
        let routes = Routes {
            video: Route::new(video.decoder.stream_index(), video_tx),
            audio: Route::new(audio.decoder.stream_index(), audio_tx),
        };

        for (name, worker, rx) in [
            ("pipeline-video", video, video_rx),
            ("pipeline-audio", audio, audio_rx),
        ] {
            let cancel = self.cancel.clone();
            let sink = Arc::clone(&sink);
            let handle = std::thread::Builder::new()
                .name(name.to_string())
                .spawn(move || transcode_loop(worker, rx, sink, cancel))?;
            self.threads.push(handle);
        }

        let cancel = self.cancel.clone();
        let handle = std::thread::Builder::new()
            .name("pipeline-demux".to_string())
            .spawn(move || demux_loop(input, routes, cancel))?;
        self.threads.push(handle);

        log::info!("pipeline started");
        Ok(())
    }

    /// Stop all pipeline threads and wait for them. Idempotent.
    pub fn stop(&mut self) {
        self.cancel.cancel();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                log::error!("pipeline thread panicked");
            }
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Route {
    stream_index: usize,
    tx: SyncSender<Packet>,
    dropped: u64,
}

impl Route {
    fn new(stream_index: usize, tx: SyncSender<Packet>) -> Self {
        Self {
            stream_index,
            tx,
            dropped: 0,
        }
    }

    /// Leaky hand-off: a full queue drops the packet instead of stalling the
    /// demuxer (and with it the other stream). Returns false once the
    /// transcoder is gone.
    fn push(&mut self, packet: Packet) -> bool {
        match self.tx.try_send(packet) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                if self.dropped % DROP_LOG_INTERVAL == 1 {
                    log::debug!(
                        "stream {} queue full, dropped {} packets",
                        self.stream_index,
                        self.dropped
                    );
                }
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

struct Routes {
    video: Route,
    audio: Route,
}

fn demux_loop(mut input: AvInput, mut routes: Routes, cancel: CancellationToken) {
    while !cancel.is_cancelled() {
        let Some((index, packet)) = input.read_packet() else {
            log::info!("end of pipeline input {}", input.url());
            break;
        };
        let alive = if index == routes.video.stream_index {
            routes.video.push(packet)
        } else if index == routes.audio.stream_index {
            routes.audio.push(packet)
        } else {
            true
        };
        if !alive {
            log::warn!("transcoder exited, stopping demux");
            break;
        }
    }
    // dropping the routes closes both queues and lets the transcoders flush
}

fn transcode_loop(
    mut worker: StreamWorker,
    rx: Receiver<Packet>,
    sink: Arc<dyn BufferSink>,
    cancel: CancellationToken,
) {
    let kind = worker.encoder.kind();
    let emit = |buffers: Vec<EncodedBuffer>| {
        for buffer in buffers {
            sink.on_buffer(buffer);
        }
    };

    while let Ok(packet) = rx.recv() {
        if cancel.is_cancelled() {
            break;
        }
        if let Err(e) = worker.decoder.send_packet(packet) {
            log::debug!("{} decoder rejected packet: {}", kind, e);
            continue;
        }
        if let Err(e) = drain_decoder(&mut worker, &emit) {
            log::error!("{} transcode error: {}", kind, e);
        }
    }

    if !cancel.is_cancelled() {
        if let Err(e) = worker.decoder.send_eof() {
            log::error!("{} decoder send eof error: {}", kind, e);
        }
        if let Err(e) = drain_decoder(&mut worker, &emit) {
            log::error!("{} transcode error: {}", kind, e);
        }
        match worker.encoder.flush() {
            Ok(buffers) => emit(buffers),
            Err(e) => log::error!("{} encoder flush error: {}", kind, e),
        }
    }
    log::info!("{} transcode loop finished", kind);
}

fn drain_decoder(
    worker: &mut StreamWorker,
    emit: &impl Fn(Vec<EncodedBuffer>),
) -> Result<(), ffmpeg_next::Error> {
    while let Some(frame) = worker.decoder.receive_frame()? {
        emit(worker.encoder.encode(frame)?);
    }
    Ok(())
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
