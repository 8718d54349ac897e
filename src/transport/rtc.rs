//! `webrtc`-backed transport.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::Context;
use async_trait::async_trait;
use webrtc::{
    api::{
        API, APIBuilder,
        interceptor_registry::register_default_interceptors,
        media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8, MediaEngine},
    },
    ice_transport::ice_server::RTCIceServer,
    peer_connection::{
        RTCPeerConnection,
        configuration::RTCConfiguration,
        peer_connection_state::RTCPeerConnectionState,
        sdp::{sdp_type::RTCSdpType, session_description::RTCSessionDescription},
    },
    rtp_transceiver::rtp_codec::RTCRtpCodecCapability,
    track::track_local::{TrackLocal, track_local_static_sample::TrackLocalStaticSample},
};

use super::{
    MediaKind, MediaTrack, PeerSession, Sample, SdpType, SessionDescription, Transport,
    TrackWriteError,
};
use crate::media::clock;

const STREAM_ID: &str = "tv-relay";

pub struct WebRtcTransport {
    api: API,
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcTransport {
    pub fn new(ice_servers: &[String]) -> anyhow::Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .context("register default codecs")?;
        let registry = register_default_interceptors(Default::default(), &mut media_engine)
            .context("register default interceptors")?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = if ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: ice_servers.to_vec(),
                ..Default::default()
            }]
        };

        Ok(Self { api, ice_servers })
    }
}

#[async_trait]
impl Transport for WebRtcTransport {
    type Track = WebRtcTrack;
    type Session = WebRtcSession;

    fn create_track(&self, kind: MediaKind) -> anyhow::Result<Arc<WebRtcTrack>> {
        let clock_rate = clock::clock_rate(kind);
        let capability = match kind {
            MediaKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate,
                ..Default::default()
            },
            MediaKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate,
                channels: 2,
                ..Default::default()
            },
        };
        let inner = Arc::new(TrackLocalStaticSample::new(
            capability,
            kind.as_str().to_owned(),
            STREAM_ID.to_owned(),
        ));
        Ok(Arc::new(WebRtcTrack {
            inner,
            kind,
            clock_rate,
        }))
    }

    async fn create_session(&self) -> anyhow::Result<WebRtcSession> {
        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };
        let pc = Arc::new(
            self.api
                .new_peer_connection(config)
                .await
                .context("create peer connection")?,
        );
        pc.on_peer_connection_state_change(Box::new(|s: RTCPeerConnectionState| {
            log::debug!("peer connection state changed: {}", s);
            Box::pin(async {})
        }));

        Ok(WebRtcSession {
            pc,
            closed: AtomicBool::new(false),
        })
    }
}

pub struct WebRtcTrack {
    inner: Arc<TrackLocalStaticSample>,
    kind: MediaKind,
    clock_rate: u32,
}

#[async_trait]
impl MediaTrack for WebRtcTrack {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    async fn write_sample(&self, sample: &Sample) -> Result<(), TrackWriteError> {
        let duration: Duration = clock::duration_for(sample.sample_count, self.clock_rate);
        let media_sample = webrtc::media::Sample {
            data: sample.data.clone(),
            duration,
            ..Default::default()
        };
        // an unbound track accepts the write and discards it
        match self.inner.write_sample(&media_sample).await {
            Ok(()) => Ok(()),
            Err(webrtc::Error::ErrClosedPipe) => Err(TrackWriteError::NoConsumers),
            Err(e) => Err(TrackWriteError::Transport(e.into())),
        }
    }
}

pub struct WebRtcSession {
    pc: Arc<RTCPeerConnection>,
    closed: AtomicBool,
}

fn to_rtc(description: SessionDescription) -> anyhow::Result<RTCSessionDescription> {
    let SessionDescription { sdp_type, sdp } = description;
    let rtc = match sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(sdp)?,
        SdpType::Pranswer => RTCSessionDescription::pranswer(sdp)?,
        SdpType::Rollback => anyhow::bail!("rollback descriptions are not supported"),
    };
    Ok(rtc)
}

fn from_rtc(description: RTCSessionDescription) -> Option<SessionDescription> {
    let sdp_type = match description.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        RTCSdpType::Unspecified => return None,
    };
    Some(SessionDescription {
        sdp_type,
        sdp: description.sdp,
    })
}

#[async_trait]
impl PeerSession for WebRtcSession {
    type Track = WebRtcTrack;

    async fn add_track(&self, track: Arc<WebRtcTrack>) -> anyhow::Result<()> {
        let local = Arc::clone(&track.inner) as Arc<dyn TrackLocal + Send + Sync>;
        let sender = self
            .pc
            .add_track(local)
            .await
            .with_context(|| format!("add {} track", track.kind))?;

        // RTCP has to be read for the interceptors (NACK, reports) to run
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });
        Ok(())
    }

    async fn create_offer(&self) -> anyhow::Result<SessionDescription> {
        let offer = self.pc.create_offer(None).await.context("create offer")?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    /// Applies the description and waits for ICE gathering to finish, so the
    /// description returned by [`PeerSession::local_description`] afterwards
    /// carries every candidate.
    async fn set_local_description(&self, description: SessionDescription) -> anyhow::Result<()> {
        let mut gather_complete = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(to_rtc(description)?)
            .await
            .context("set local description")?;
        let _ = gather_complete.recv().await;
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.pc.local_description().await.and_then(from_rtc)
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> anyhow::Result<()> {
        self.pc
            .set_remote_description(to_rtc(description)?)
            .await
            .context("set remote description")
    }

    async fn close(&self) -> anyhow::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.pc.close().await.context("close peer connection")
    }
}

impl Drop for WebRtcSession {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let pc = Arc::clone(&self.pc);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = pc.close().await {
                    log::debug!("close dropped peer connection: {}", e);
                }
            });
        }
    }
}
