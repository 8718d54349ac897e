//! Moves encoded buffers from the transcode threads onto the shared tracks.
//!
//! ```text
//! pipeline-video ─► on_buffer ─► [bounded queue] ─► writer task ─► video track
//! pipeline-audio ─► on_buffer ─► [bounded queue] ─► writer task ─► audio track
//! ```
//!
//! `on_buffer` runs on pipeline-owned threads and must never block them, so
//! it only does a `try_send`. A full queue drops the sample. Each writer task
//! drains its queue in order, so a track sees its samples in production
//! order.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use ffmpeg_bus::{
    PipelineError,
    buffer::{BufferSink, EncodedBuffer, MediaKind},
    description::PipelineDescription,
    pipeline::Pipeline,
};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    media::{clock, origin::MediaOrigin},
    transport::{MediaTrack, Sample, TrackWriteError},
};

/// Log "queue full" at most every N drops.
const DROP_LOG_INTERVAL: u64 = 120;

pub const DEFAULT_SAMPLE_QUEUE: usize = 256;

/// Something that pushes encoded buffers into a [`BufferSink`] from its own
/// threads.
pub trait MediaSource: Send {
    fn start(&mut self, sink: Arc<dyn BufferSink>) -> Result<(), PipelineError>;

    fn stop(&mut self);
}

impl MediaSource for Pipeline {
    fn start(&mut self, sink: Arc<dyn BufferSink>) -> Result<(), PipelineError> {
        Pipeline::start(self, sink)
    }

    fn stop(&mut self) {
        Pipeline::stop(self)
    }
}

pub struct PipelineBridge<T> {
    source: Mutex<Box<dyn MediaSource>>,
    origin: Arc<MediaOrigin<T>>,
    queue_capacity: usize,
    fatal: CancellationToken,
    cancel: CancellationToken,
    started: AtomicBool,
    writers: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: MediaTrack + 'static> PipelineBridge<T> {
    /// Build the transcode pipeline from its textual description. A
    /// transport failure on either track later cancels `fatal`.
    pub fn create(
        description: &str,
        origin: Arc<MediaOrigin<T>>,
        queue_capacity: usize,
        fatal: CancellationToken,
    ) -> Result<Self, PipelineError> {
        let description: PipelineDescription = description.parse()?;
        let pipeline = Pipeline::new(&description)?;
        Ok(Self::new(Box::new(pipeline), origin, queue_capacity, fatal))
    }

    pub fn new(
        source: Box<dyn MediaSource>,
        origin: Arc<MediaOrigin<T>>,
        queue_capacity: usize,
        fatal: CancellationToken,
    ) -> Self {
        Self {
            source: Mutex::new(source),
            origin,
            queue_capacity: queue_capacity.max(1),
            fatal,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            writers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the track writers and start the source. Must be called from
    /// within a tokio runtime.
    pub fn start(&self) -> Result<(), PipelineError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::AlreadyStarted);
        }

        let (video_tx, video_rx) = mpsc::channel(self.queue_capacity);
        let (audio_tx, audio_rx) = mpsc::channel(self.queue_capacity);
        let sink = Arc::new(BridgeSink::new(
            self.queue(MediaKind::Video, video_tx),
            self.queue(MediaKind::Audio, audio_tx),
        ));

        {
            let mut writers = self.lock_writers();
            for (kind, rx) in [(MediaKind::Video, video_rx), (MediaKind::Audio, audio_rx)] {
                writers.push(tokio::spawn(write_loop(
                    Arc::clone(self.origin.track(kind)),
                    rx,
                    self.cancel.clone(),
                    self.fatal.clone(),
                )));
            }
        }

        let result = self.lock_source().start(sink);
        if let Err(e) = result {
            self.cancel.cancel();
            return Err(e);
        }
        log::info!("pipeline bridge started");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.cancel.is_cancelled()
    }

    /// Stop the source and the writers. Blocks until the pipeline threads
    /// have exited. Idempotent.
    pub fn stop(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        self.lock_source().stop();
        for handle in self.lock_writers().drain(..) {
            handle.abort();
        }
        log::info!("pipeline bridge stopped");
    }

    fn queue(&self, kind: MediaKind, tx: mpsc::Sender<Sample>) -> TrackQueue {
        TrackQueue::new(kind, self.origin.track(kind).clock_rate(), tx)
    }

    fn lock_source(&self) -> std::sync::MutexGuard<'_, Box<dyn MediaSource>> {
        self.source.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_writers(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.writers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<T> Drop for PipelineBridge<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct TrackQueue {
    kind: MediaKind,
    clock_rate: u32,
    tx: mpsc::Sender<Sample>,
    dropped: AtomicU64,
}

impl TrackQueue {
    fn new(kind: MediaKind, clock_rate: u32, tx: mpsc::Sender<Sample>) -> Self {
        Self {
            kind,
            clock_rate,
            tx,
            dropped: AtomicU64::new(0),
        }
    }

    fn push(&self, buffer: EncodedBuffer) {
        let sample = Sample {
            sample_count: clock::samples_or_zero(buffer.duration, self.clock_rate),
            data: buffer.data,
        };
        match self.tx.try_send(sample) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped % DROP_LOG_INTERVAL == 1 {
                    log::debug!("{} sample queue full, dropped {} samples", self.kind, dropped);
                }
            }
            // writer gone, the bridge is stopping
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

/// The callback surface handed to the pipeline.
struct BridgeSink {
    video: TrackQueue,
    audio: TrackQueue,
}

impl BridgeSink {
    fn new(video: TrackQueue, audio: TrackQueue) -> Self {
        Self { video, audio }
    }
}

impl BufferSink for BridgeSink {
    fn on_buffer(&self, buffer: EncodedBuffer) {
        match buffer.kind {
            MediaKind::Video => self.video.push(buffer),
            MediaKind::Audio => self.audio.push(buffer),
        }
    }
}

async fn write_loop<T: MediaTrack>(
    track: Arc<T>,
    mut rx: mpsc::Receiver<Sample>,
    cancel: CancellationToken,
    fatal: CancellationToken,
) {
    let kind = track.kind();
    loop {
        let sample = tokio::select! {
            _ = cancel.cancelled() => break,
            sample = rx.recv() => match sample {
                Some(sample) => sample,
                None => break,
            },
        };
        match track.write_sample(&sample).await {
            Ok(()) | Err(TrackWriteError::NoConsumers) => {}
            Err(TrackWriteError::Transport(e)) => {
                log::error!("{} track write failed: {:#}", kind, e);
                fatal.cancel();
                break;
            }
        }
    }
    log::debug!("{} track writer finished", kind);
}

#[cfg(test)]
#[path = "bridge_test.rs"]
mod bridge_test;
