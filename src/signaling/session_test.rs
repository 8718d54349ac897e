use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use super::{SessionOptions, SessionSlot, SessionState, SignalingSession};
use crate::{
    media::origin::MediaOrigin,
    signaling::{
        channel::memory::{self, MemoryChannel, MemoryViewer},
        message::{EVENT_ERROR, EVENT_OFFER, SignalingMessage},
    },
    transport::{
        MediaKind, MediaTrack, Sample, SdpType, SessionDescription,
        mock::{MOCK_SDP, MockSession, MockTrack, MockTransport},
    },
};

type TestSession = SignalingSession<MockSession, MemoryChannel>;

struct Fixture {
    transport: MockTransport,
    origin: MediaOrigin<MockTrack>,
    shutdown: CancellationToken,
}

impl Fixture {
    fn new() -> anyhow::Result<Self> {
        let transport = MockTransport::default();
        let origin = MediaOrigin::new(&transport)?;
        Ok(Self {
            transport,
            origin,
            shutdown: CancellationToken::new(),
        })
    }

    async fn connect(
        &self,
        options: SessionOptions,
    ) -> anyhow::Result<(TestSession, MemoryViewer)> {
        let (channel, viewer) = memory::pair();
        let session = SignalingSession::create(
            &self.transport,
            &self.origin,
            SessionSlot::new(),
            channel,
            options,
            self.shutdown.clone(),
        )
        .await?;
        Ok((session, viewer))
    }
}

fn valid_answer() -> anyhow::Result<SignalingMessage> {
    Ok(SignalingMessage::answer(&SessionDescription::answer(MOCK_SDP))?)
}

async fn wait_for(session: &TestSession, expected: SessionState) -> anyhow::Result<()> {
    let mut rx = session.subscribe();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == expected)).await??;
    Ok(())
}

#[tokio::test]
async fn test_create_sends_offer() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    let (session, mut viewer) = fixture.connect(SessionOptions::default()).await?;

    assert_eq!(session.state(), SessionState::OfferSent);
    let message = viewer.recv().await?;
    assert_eq!(message.event, EVENT_OFFER);
    let offer = message.description()?;
    assert_eq!(offer.sdp_type, SdpType::Offer);
    assert_eq!(offer.sdp, MOCK_SDP);

    let sessions = fixture.transport.sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].track_count(), 2);
    Ok(())
}

#[tokio::test]
async fn test_valid_answer_activates() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    let (session, mut viewer) = fixture.connect(SessionOptions::default()).await?;
    viewer.recv().await?;
    let session = Arc::new(session);

    let runner = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.run().await }
    });

    viewer.send(&valid_answer()?)?;
    wait_for(&session, SessionState::Active).await?;
    let remote = fixture.transport.sessions()[0].remote();
    assert_eq!(remote.map(|d| d.sdp_type), Some(SdpType::Answer));

    // a second answer is not a renegotiation
    viewer.send(&valid_answer()?)?;
    viewer.send(&SignalingMessage::new("candidate", "x"))?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(session.state(), SessionState::Active);

    drop(viewer);
    assert_eq!(runner.await?, SessionState::Closed);
    assert_eq!(fixture.transport.sessions()[0].releases(), 1);
    Ok(())
}

#[tokio::test]
async fn test_malformed_answer_keeps_session() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    let (session, mut viewer) = fixture.connect(SessionOptions::default()).await?;
    viewer.recv().await?;
    let session = Arc::new(session);
    let runner = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.run().await }
    });

    viewer.send(&SignalingMessage::new("answer", "{not a description"))?;
    let error = viewer.recv().await?;
    assert_eq!(error.event, EVENT_ERROR);
    assert_eq!(session.state(), SessionState::Negotiating);
    assert!(!viewer.is_closed());

    // parses, but the transport refuses it
    viewer.send(&SignalingMessage::answer(&SessionDescription::answer("garbage"))?)?;
    assert_eq!(viewer.recv().await?.event, EVENT_ERROR);
    assert_eq!(session.state(), SessionState::Negotiating);

    viewer.send(&valid_answer()?)?;
    wait_for(&session, SessionState::Active).await?;

    session.close().await;
    assert_eq!(runner.await?, SessionState::Closed);
    assert!(viewer.is_closed());
    Ok(())
}

#[tokio::test]
async fn test_undecodable_frames_are_skipped() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    let (session, mut viewer) = fixture.connect(SessionOptions::default()).await?;
    viewer.recv().await?;
    let session = Arc::new(session);
    let runner = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.run().await }
    });

    viewer.send_raw(b"\xff\xfe not json".to_vec())?;
    viewer.send_raw(br#"{"data":"no event"}"#.to_vec())?;
    viewer.send(&SignalingMessage::new("bogus", ""))?;
    viewer.send(&valid_answer()?)?;
    wait_for(&session, SessionState::Active).await?;

    fixture.shutdown.cancel();
    assert_eq!(runner.await?, SessionState::Closed);
    Ok(())
}

#[tokio::test]
async fn test_close_is_idempotent() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    let (session, viewer) = fixture.connect(SessionOptions::default()).await?;

    session.close().await;
    session.close().await;
    assert_eq!(session.state(), SessionState::Closed);
    assert!(viewer.is_closed());

    let sessions = fixture.transport.sessions();
    let state = &sessions[0];
    assert!(state.is_closed());
    assert_eq!(state.releases(), 1);

    // run on a closed session returns at once
    assert_eq!(session.run().await, SessionState::Closed);
    drop(session);
    assert_eq!(state.releases(), 1);
    Ok(())
}

#[tokio::test]
async fn test_offer_failure_fails_creation() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    fixture.transport.fail_offers();
    let (channel, viewer) = memory::pair();

    let result: anyhow::Result<TestSession> = SignalingSession::create(
        &fixture.transport,
        &fixture.origin,
        SessionSlot::new(),
        channel,
        SessionOptions::default(),
        fixture.shutdown.clone(),
    )
    .await;

    assert!(result.is_err());
    assert!(viewer.is_closed());
    assert_eq!(fixture.transport.sessions()[0].releases(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_negotiation_timeout() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    let options = SessionOptions {
        negotiation_timeout: Some(Duration::from_secs(10)),
    };
    let (session, mut viewer) = fixture.connect(options).await?;
    viewer.recv().await?;

    assert_eq!(session.run().await, SessionState::Failed);
    assert_eq!(viewer.recv().await?.event, EVENT_ERROR);
    assert!(viewer.is_closed());
    assert_eq!(fixture.transport.sessions()[0].releases(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_timeout_does_not_end_active_session() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    let options = SessionOptions {
        negotiation_timeout: Some(Duration::from_secs(10)),
    };
    let (session, mut viewer) = fixture.connect(options).await?;
    viewer.recv().await?;
    viewer.send(&valid_answer()?)?;
    let session = Arc::new(session);
    let runner = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.run().await }
    });

    wait_for(&session, SessionState::Active).await?;
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(session.state(), SessionState::Active);

    fixture.shutdown.cancel();
    assert_eq!(runner.await?, SessionState::Closed);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_sessions_are_independent() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    let (first, mut first_viewer) = fixture.connect(SessionOptions::default()).await?;
    let (second, mut second_viewer) = fixture.connect(SessionOptions::default()).await?;
    first_viewer.recv().await?;
    second_viewer.recv().await?;

    let (first, second) = (Arc::new(first), Arc::new(second));
    let first_runner = tokio::spawn({
        let session = Arc::clone(&first);
        async move { session.run().await }
    });
    let second_runner = tokio::spawn({
        let session = Arc::clone(&second);
        async move { session.run().await }
    });

    first_viewer.send(&valid_answer()?)?;
    second_viewer.send(&valid_answer()?)?;
    wait_for(&first, SessionState::Active).await?;
    wait_for(&second, SessionState::Active).await?;

    let sessions = fixture.transport.sessions();
    let mut first_video = sessions[0]
        .take_receiver(MediaKind::Video)
        .ok_or_else(|| anyhow::anyhow!("first session has no video"))?;
    let mut second_video = sessions[1]
        .take_receiver(MediaKind::Video)
        .ok_or_else(|| anyhow::anyhow!("second session has no video"))?;

    first.close().await;
    assert_eq!(first_runner.await?, SessionState::Closed);
    assert_eq!(second.state(), SessionState::Active);
    assert!(!second_viewer.is_closed());

    // the shared track still reaches the remaining viewer
    let sample = Sample {
        data: Bytes::from_static(b"frame"),
        sample_count: 3000,
    };
    first_video.close();
    fixture.origin.video().write_sample(&sample).await?;
    assert_eq!(second_video.recv().await, Some(sample));
    assert_eq!(fixture.origin.video().subscriber_count(), 1);

    second.close().await;
    assert_eq!(second_runner.await?, SessionState::Closed);
    Ok(())
}

#[tokio::test]
async fn test_silent_viewer_does_not_delay_others() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    // connects but never answers or reads
    let (_silent, _silent_viewer) = fixture.connect(SessionOptions::default()).await?;
    let (_active, mut viewer) = fixture.connect(SessionOptions::default()).await?;
    viewer.recv().await?;

    let mut audio = fixture.transport.sessions()[1]
        .take_receiver(MediaKind::Audio)
        .ok_or_else(|| anyhow::anyhow!("no audio subscription"))?;
    for i in 0..100u32 {
        let sample = Sample {
            data: Bytes::from(i.to_be_bytes().to_vec()),
            sample_count: 960,
        };
        fixture.origin.audio().write_sample(&sample).await?;
    }
    for i in 0..100u32 {
        let sample = audio.recv().await;
        assert_eq!(sample.map(|s| s.data), Some(Bytes::from(i.to_be_bytes().to_vec())));
    }
    Ok(())
}

#[tokio::test]
async fn test_slot_is_connected_until_offer_sent() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    fixture.transport.hold_offers();
    let (channel, mut viewer) = memory::pair();
    let slot = SessionSlot::new();
    let id = slot.id();
    let state = slot.subscribe();

    let create = SignalingSession::create(
        &fixture.transport,
        &fixture.origin,
        slot,
        channel,
        SessionOptions::default(),
        fixture.shutdown.clone(),
    );
    let (session, _) = tokio::join!(create, async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*state.borrow(), SessionState::Connected);
        fixture.transport.release_offers();
    });
    let session: TestSession = session?;

    assert_eq!(session.id(), id);
    assert_eq!(*state.borrow(), SessionState::OfferSent);
    assert_eq!(viewer.recv().await?.event, EVENT_OFFER);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_kick_before_offer_closes_session() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    fixture.transport.hold_offers();
    let (channel, viewer) = memory::pair();
    let slot = SessionSlot::new();
    let state = slot.subscribe();
    let kick = fixture.shutdown.child_token();

    let create = SignalingSession::create(
        &fixture.transport,
        &fixture.origin,
        slot,
        channel,
        SessionOptions::default(),
        kick.clone(),
    );
    let (result, _) = tokio::join!(create, async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        kick.cancel();
    });
    let result: anyhow::Result<TestSession> = result;

    assert!(result.is_err());
    assert_eq!(*state.borrow(), SessionState::Closed);
    assert!(viewer.is_closed());
    assert_eq!(fixture.transport.sessions()[0].releases(), 1);
    Ok(())
}
