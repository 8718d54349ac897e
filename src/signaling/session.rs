//! Per-viewer negotiation.
//!
//! ```text
//! Connected ──create──► OfferSent ──answer──► Negotiating ──ok──► Active
//!     │                     │                   │  ▲ bad answer     │
//!     └─────────────────────┴───────────────────┴──┴────────────────┴──► Closed
//!                 any failure during creation or timeout ──► Failed
//! ```

use std::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use anyhow::Context;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{
    channel::SignalChannel,
    message::{EVENT_ANSWER, SignalingMessage},
};
use crate::{
    media::origin::MediaOrigin,
    transport::{PeerSession, SessionDescription, Transport},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connected,
    OfferSent,
    Negotiating,
    Active,
    Closed,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connected => "connected",
            SessionState::OfferSent => "offer_sent",
            SessionState::Negotiating => "negotiating",
            SessionState::Active => "active",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SessionOptions {
    /// Give up on viewers that are not `Active` after this long.
    pub negotiation_timeout: Option<Duration>,
}

/// Identity and state of a session that exists before its offer does, so the
/// viewer can be listed and kicked while negotiation is still being set up.
pub struct SessionSlot {
    id: Uuid,
    state: watch::Sender<SessionState>,
}

impl SessionSlot {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionState::Connected);
        Self {
            id: Uuid::new_v4(),
            state,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }
}

impl Default for SessionSlot {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SignalingSession<S, C> {
    id: Uuid,
    peer: S,
    channel: C,
    state: watch::Sender<SessionState>,
    options: SessionOptions,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl<S, C> SignalingSession<S, C>
where
    S: PeerSession,
    C: SignalChannel,
{
    /// Bind both shared tracks to a new transport session and send the offer.
    /// On failure the session ends `Failed` and the channel is closed. Firing
    /// `shutdown` before the offer is out ends it `Closed`.
    pub async fn create<T>(
        transport: &T,
        origin: &MediaOrigin<S::Track>,
        slot: SessionSlot,
        channel: C,
        options: SessionOptions,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Self>
    where
        T: Transport<Session = S, Track = S::Track>,
    {
        let SessionSlot { id, state } = slot;
        let peer = match transport.create_session().await {
            Ok(peer) => peer,
            Err(e) => {
                state.send_replace(SessionState::Failed);
                channel.close().await;
                return Err(e.context("create transport session"));
            }
        };

        let session = Self {
            id,
            peer,
            channel,
            state,
            options,
            shutdown,
            closed: AtomicBool::new(false),
        };

        let offered = tokio::select! {
            result = session.send_offer(origin) => result,
            _ = session.shutdown.cancelled() => {
                session.close().await;
                anyhow::bail!("session {} closed before the offer was sent", session.id);
            }
        };
        if let Err(e) = offered {
            session.set_state(SessionState::Failed);
            session.close().await;
            return Err(e);
        }
        session.set_state(SessionState::OfferSent);
        log::info!("session {} offer sent", session.id);
        Ok(session)
    }

    async fn send_offer(&self, origin: &MediaOrigin<S::Track>) -> anyhow::Result<()> {
        self.peer.add_track(std::sync::Arc::clone(origin.video())).await?;
        self.peer.add_track(std::sync::Arc::clone(origin.audio())).await?;

        let offer = self.peer.create_offer().await?;
        self.peer.set_local_description(offer.clone()).await?;
        // prefer the applied description, it carries the gathered candidates
        let offer = self.peer.local_description().await.unwrap_or(offer);

        let message = SignalingMessage::offer(&offer).context("encode offer")?;
        self.channel.send(&message).await.context("send offer")
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: SessionState) {
        self.state.send_if_modified(|current| {
            // terminal states are final
            if current.is_terminal() || *current == state {
                return false;
            }
            log::debug!("session {} {} -> {}", self.id, current, state);
            *current = state;
            true
        });
    }

    /// Read viewer messages until the channel closes, the server shuts down
    /// or negotiation times out. Returns the final state.
    pub async fn run(&self) -> SessionState {
        let deadline = self
            .options
            .negotiation_timeout
            .map(|timeout| tokio::time::Instant::now() + timeout);

        while !self.state().is_terminal() {
            let negotiation_expired = async {
                match deadline {
                    Some(deadline) if self.state() != SessionState::Active => {
                        tokio::time::sleep_until(deadline).await
                    }
                    _ => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    log::debug!("session {} closed by server shutdown", self.id);
                    break;
                }
                _ = negotiation_expired => {
                    log::warn!("session {} negotiation timed out", self.id);
                    self.set_state(SessionState::Failed);
                    self.notify_error("negotiation timed out").await;
                    break;
                }
                frame = self.channel.recv() => match frame {
                    Some(frame) => self.handle_frame(&frame).await,
                    None => {
                        log::info!("session {} viewer disconnected", self.id);
                        break;
                    }
                },
            }
        }

        self.close().await;
        self.state()
    }

    async fn handle_frame(&self, frame: &[u8]) {
        let message = match SignalingMessage::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("session {} undecodable message: {}", self.id, e);
                return;
            }
        };

        match message.event.as_str() {
            EVENT_ANSWER => self.on_answer(&message).await,
            event => log::debug!("session {} ignoring {:?} event", self.id, event),
        }
    }

    async fn on_answer(&self, message: &SignalingMessage) {
        match self.state() {
            SessionState::OfferSent | SessionState::Negotiating => {}
            SessionState::Active => {
                log::debug!("session {} already active, ignoring answer", self.id);
                return;
            }
            _ => return,
        }

        self.set_state(SessionState::Negotiating);
        match self.apply_answer(message).await {
            Ok(()) => {
                self.set_state(SessionState::Active);
                log::info!("session {} active", self.id);
            }
            Err(e) => {
                log::warn!("session {} rejected answer: {:#}", self.id, e);
                self.notify_error(format!("invalid answer: {:#}", e)).await;
            }
        }
    }

    async fn apply_answer(&self, message: &SignalingMessage) -> anyhow::Result<()> {
        let answer: SessionDescription = message.description().context("parse answer")?;
        self.peer.set_remote_description(answer).await
    }

    async fn notify_error(&self, reason: impl Into<String>) {
        if let Err(e) = self.channel.send(&SignalingMessage::error(reason)).await {
            log::debug!("session {} error notification not sent: {:#}", self.id, e);
        }
    }

    /// Release the transport session and the channel. The shared tracks are
    /// untouched. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.set_state(SessionState::Closed);
        if let Err(e) = self.peer.close().await {
            log::warn!("session {} transport close: {:#}", self.id, e);
        }
        self.channel.close().await;
        log::debug!("session {} released", self.id);
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;
