use std::sync::Arc;

use crate::transport::{MediaKind, MediaTrack, Transport};

/// The two process-wide output tracks. Built once by `main`; the bridge
/// writes to them and every viewer session reads them.
pub struct MediaOrigin<T> {
    video: Arc<T>,
    audio: Arc<T>,
}

impl<T: MediaTrack> MediaOrigin<T> {
    pub fn new<X>(transport: &X) -> anyhow::Result<Self>
    where
        X: Transport<Track = T>,
    {
        Ok(Self {
            video: transport.create_track(MediaKind::Video)?,
            audio: transport.create_track(MediaKind::Audio)?,
        })
    }

    pub fn track(&self, kind: MediaKind) -> &Arc<T> {
        match kind {
            MediaKind::Video => &self.video,
            MediaKind::Audio => &self.audio,
        }
    }

    pub fn video(&self) -> &Arc<T> {
        &self.video
    }

    pub fn audio(&self) -> &Arc<T> {
        &self.audio
    }
}
