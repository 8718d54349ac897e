//! Runs a pipeline description on its own and prints what comes out. Handy
//! for checking a tuner or capture file before putting viewers on it.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use ffmpeg_bus::{
    buffer::{BufferSink, EncodedBuffer, MediaKind},
    description::{DEFAULT_DESCRIPTION, PipelineDescription},
    pipeline::Pipeline,
};

#[derive(Default)]
struct PrintSink {
    video: AtomicU64,
    audio: AtomicU64,
}

impl BufferSink for PrintSink {
    fn on_buffer(&self, buffer: EncodedBuffer) {
        let counter = match buffer.kind {
            MediaKind::Video => &self.video,
            MediaKind::Audio => &self.audio,
        };
        let n = counter.fetch_add(1, Ordering::Relaxed);
        if n % 100 == 0 {
            println!(
                "{} buffer #{}: {} bytes, duration {:?}",
                buffer.kind,
                n,
                buffer.data.len(),
                buffer.duration
            );
        }
    }
}

fn main() -> anyhow::Result<()> {
    let text = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string());
    let description: PipelineDescription = text.parse()?;

    let mut pipeline = Pipeline::new(&description)?;
    let sink = Arc::new(PrintSink::default());
    pipeline.start(Arc::clone(&sink) as Arc<dyn BufferSink>)?;

    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
        let _ = tx.send(());
    });
    println!("press enter to stop");
    let _ = rx.recv();

    pipeline.stop();
    println!(
        "video buffers: {}, audio buffers: {}",
        sink.video.load(Ordering::Relaxed),
        sink.audio.load(Ordering::Relaxed)
    );
    Ok(())
}
