//! In-memory transport for tests. Tracks fan samples out to unbounded
//! channels; sessions record what the signaling layer did to them.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use tokio::sync::{
    mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
    watch,
};

use super::{
    MediaKind, MediaTrack, PeerSession, Sample, SdpType, SessionDescription, Transport,
    TrackWriteError,
};
use crate::media::clock;

pub const MOCK_SDP: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\n";

pub struct MockTrack {
    kind: MediaKind,
    subscribers: Mutex<Vec<UnboundedSender<Sample>>>,
    fail: AtomicBool,
    written: AtomicUsize,
}

impl MockTrack {
    pub fn new(kind: MediaKind) -> Self {
        Self {
            kind,
            subscribers: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            written: AtomicUsize::new(0),
        }
    }

    pub fn subscribe(&self) -> UnboundedReceiver<Sample> {
        let (tx, rx) = unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Make every following write fail with a transport error.
    pub fn fail_writes(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// Samples handed to at least one subscriber.
    pub fn written(&self) -> usize {
        self.written.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }
}

#[async_trait]
impl MediaTrack for MockTrack {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn clock_rate(&self) -> u32 {
        clock::clock_rate(self.kind)
    }

    async fn write_sample(&self, sample: &Sample) -> Result<(), TrackWriteError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TrackWriteError::Transport(anyhow::anyhow!(
                "mock {} track broken",
                self.kind
            )));
        }
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.send(sample.clone()).is_ok());
        if subscribers.is_empty() {
            return Err(TrackWriteError::NoConsumers);
        }
        self.written.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// What a [`MockSession`] went through, shared with the test.
#[derive(Default)]
pub struct MockSessionState {
    receivers: Mutex<Vec<(MediaKind, UnboundedReceiver<Sample>)>>,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    closed: AtomicBool,
    releases: AtomicUsize,
}

impl MockSessionState {
    /// Take the subscription the session holds on the `kind` track.
    pub fn take_receiver(&self, kind: MediaKind) -> Option<UnboundedReceiver<Sample>> {
        let mut receivers = self.receivers.lock().unwrap();
        let pos = receivers.iter().position(|(k, _)| *k == kind)?;
        Some(receivers.remove(pos).1)
    }

    pub fn track_count(&self) -> usize {
        self.receivers.lock().unwrap().len()
    }

    pub fn remote(&self) -> Option<SessionDescription> {
        self.remote.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// How many times the session actually released its resources.
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

pub struct MockSession {
    state: Arc<MockSessionState>,
    fail_offer: bool,
    offers_held: watch::Receiver<bool>,
}

impl MockSession {
    fn release(&self) -> bool {
        if self.state.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.state.receivers.lock().unwrap().clear();
        self.state.releases.fetch_add(1, Ordering::SeqCst);
        true
    }
}

#[async_trait]
impl PeerSession for MockSession {
    type Track = MockTrack;

    async fn add_track(&self, track: Arc<MockTrack>) -> anyhow::Result<()> {
        let rx = track.subscribe();
        self.state.receivers.lock().unwrap().push((track.kind(), rx));
        Ok(())
    }

    async fn create_offer(&self) -> anyhow::Result<SessionDescription> {
        let mut held = self.offers_held.clone();
        if held.wait_for(|held| !*held).await.is_err() {
            anyhow::bail!("mock transport gone");
        }
        if self.fail_offer {
            anyhow::bail!("mock offer failure");
        }
        Ok(SessionDescription::offer(MOCK_SDP))
    }

    async fn set_local_description(&self, description: SessionDescription) -> anyhow::Result<()> {
        *self.state.local.lock().unwrap() = Some(description);
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.state.local.lock().unwrap().clone()
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> anyhow::Result<()> {
        if self.state.is_closed() {
            anyhow::bail!("session closed");
        }
        if description.sdp_type != SdpType::Answer || !description.sdp.starts_with("v=0") {
            anyhow::bail!("invalid remote description");
        }
        *self.state.remote.lock().unwrap() = Some(description);
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.release();
        Ok(())
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.release();
    }
}

pub struct MockTransport {
    sessions: Mutex<Vec<Arc<MockSessionState>>>,
    fail_offer: AtomicBool,
    offers_held: watch::Sender<bool>,
}

impl Default for MockTransport {
    fn default() -> Self {
        let (offers_held, _) = watch::channel(false);
        Self {
            sessions: Mutex::new(Vec::new()),
            fail_offer: AtomicBool::new(false),
            offers_held,
        }
    }
}

impl MockTransport {
    /// Offers block until [`MockTransport::release_offers`], like a slow
    /// candidate gathering.
    pub fn hold_offers(&self) {
        self.offers_held.send_replace(true);
    }

    pub fn release_offers(&self) {
        self.offers_held.send_replace(false);
    }

    pub fn fail_offers(&self) {
        self.fail_offer.store(true, Ordering::SeqCst);
    }

    /// Every session created so far, oldest first.
    pub fn sessions(&self) -> Vec<Arc<MockSessionState>> {
        self.sessions.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Track = MockTrack;
    type Session = MockSession;

    fn create_track(&self, kind: MediaKind) -> anyhow::Result<Arc<MockTrack>> {
        Ok(Arc::new(MockTrack::new(kind)))
    }

    async fn create_session(&self) -> anyhow::Result<MockSession> {
        let state = Arc::new(MockSessionState::default());
        self.sessions.lock().unwrap().push(Arc::clone(&state));
        Ok(MockSession {
            state,
            fail_offer: self.fail_offer.load(Ordering::SeqCst),
            offers_held: self.offers_held.subscribe(),
        })
    }
}
