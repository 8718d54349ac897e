//! The seam between the relay and the peer-to-peer media transport.
//!
//! The relay only needs shared outbound tracks and per-viewer sessions that
//! can run an offer/answer exchange. ICE, DTLS/SRTP and congestion control
//! stay behind these traits.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub use ffmpeg_bus::buffer::MediaKind;

#[cfg(test)]
pub mod mock;
pub mod rtc;

/// One encoded media unit ready for a track, with its length in the
/// track's clock units.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sample {
    pub data: Bytes,
    pub sample_count: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum TrackWriteError {
    /// Nobody is attached to the track. Expected whenever no viewer is
    /// connected.
    #[error("no consumers attached to track")]
    NoConsumers,
    #[error("track write failed: {0}")]
    Transport(#[source] anyhow::Error),
}

/// A shared outbound stream. Written by one producer, read by every session
/// the track was added to.
#[async_trait]
pub trait MediaTrack: Send + Sync {
    fn kind(&self) -> MediaKind;

    fn clock_rate(&self) -> u32;

    /// Fan the sample out to every attached session. Must not wait on any
    /// single slow session.
    async fn write_sample(&self, sample: &Sample) -> Result<(), TrackWriteError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// Session description as exchanged with the browser
/// (`RTCSessionDescriptionInit`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    #[cfg(test)]
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// One viewer's transport connection.
#[async_trait]
pub trait PeerSession: Send + Sync {
    type Track: MediaTrack;

    async fn add_track(&self, track: Arc<Self::Track>) -> anyhow::Result<()>;

    async fn create_offer(&self) -> anyhow::Result<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription) -> anyhow::Result<()>;

    /// The description actually in effect locally. May differ from what was
    /// set (gathered candidates are folded in).
    async fn local_description(&self) -> Option<SessionDescription>;

    async fn set_remote_description(&self, description: SessionDescription)
        -> anyhow::Result<()>;

    /// Release the transport resources. Calling it again is a no-op.
    async fn close(&self) -> anyhow::Result<()>;
}

/// Factory for tracks and sessions.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Track: MediaTrack + 'static;
    type Session: PeerSession<Track = Self::Track> + 'static;

    fn create_track(&self, kind: MediaKind) -> anyhow::Result<Arc<Self::Track>>;

    async fn create_session(&self) -> anyhow::Result<Self::Session>;
}
