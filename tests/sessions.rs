use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use huecast::capture::{Frame, PixelFormat, TimeBase};
use huecast::display::overlay;
use huecast::session::loopback::{LoopbackOptions, LoopbackTransport, RemotePeer};
use huecast::session::{
    ConnectionSession, PeerState, SdpType, SessionContext, SessionDescription, SessionError,
    SessionRegistry, SessionState,
};
use huecast::{ColorSample, Config, Detection, Detector, DetectorError, Region};

const WAIT: Duration = Duration::from_secs(5);
const BLUE: ColorSample = ColorSample::new(0, 0, 255);
const RED: ColorSample = ColorSample::new(255, 0, 0);

struct CupDetector {
    calls: AtomicUsize,
}

impl Detector for CupDetector {
    fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![Detection::new(Region::new(10, 10, 50, 50), "cup", 0.9)])
    }
}

/// Holds the annotation task busy for a while on every refresh
struct SlowDetector {
    started: AtomicUsize,
    delay: Duration,
}

impl Detector for SlowDetector {
    fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        Ok(Vec::new())
    }
}

struct MissingModel;

impl Detector for MissingModel {
    fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        Err(DetectorError::Unavailable("yolov8n weights not found".into()))
    }
}

fn offer() -> SessionDescription {
    SessionDescription::offer("v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\n")
}

/// Blue frame with a red square just inside (10,10)-(50,50)
fn camera_frame(pts: i64) -> Frame {
    let mut frame = Frame::new(160, 120, PixelFormat::Bgr24, pts, TimeBase::VIDEO);
    overlay::fill_rect(&mut frame, 0, 0, 160, 120, BLUE);
    overlay::fill_rect(&mut frame, 12, 12, 36, 36, RED);
    frame
}

fn open(
    registry: &SessionRegistry,
    options: LoopbackOptions,
    detector: Option<Arc<dyn Detector>>,
) -> (Arc<ConnectionSession>, RemotePeer) {
    let (transport, remotes) = LoopbackTransport::new(options);
    let context = SessionContext::new(&Config::default(), detector);
    let (session, answer) =
        ConnectionSession::accept(&offer(), &transport, context, registry).unwrap();
    assert_eq!(answer.kind, SdpType::Answer);
    let remote = remotes.try_recv().unwrap();
    (session, remote)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cached_detections_label_every_frame() {
    let registry = SessionRegistry::new();
    let detector = Arc::new(CupDetector {
        calls: AtomicUsize::new(0),
    });
    let (session, remote) = open(&registry, LoopbackOptions::default(), Some(detector.clone()));

    let camera = remote.add_video_track("camera").unwrap();
    for i in 0..5 {
        camera.send_async(camera_frame(i * 3_000)).await.unwrap();
    }

    for i in 0..5 {
        let frame = tokio::time::timeout(WAIT, remote.annotated().recv_async())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.meta.pts, i * 3_000);
        assert_eq!(frame.meta.time_base, TimeBase::VIDEO);
        // box edges repainted from blue to the dominant red
        assert_eq!(frame.sample(30, 10), RED);
        assert_eq!(frame.sample(10, 30), RED);
        assert_eq!(frame.sample(49, 30), RED);
        assert_eq!(frame.sample(30, 49), RED);
        // outside the box stays untouched
        assert_eq!(frame.sample(100, 5), BLUE);
    }

    assert_eq!(detector.calls.load(Ordering::SeqCst), 3);
    let stats = session.stats();
    assert_eq!(stats.frames_annotated, 5);
    assert_eq!(stats.detector_runs, 3);
    assert_eq!(stats.step_failures, 0);

    session.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unavailable_detector_degrades_to_color_only() {
    let registry = SessionRegistry::new();
    let (session, remote) = open(
        &registry,
        LoopbackOptions::default(),
        Some(Arc::new(MissingModel)),
    );

    let camera = remote.add_video_track("camera").unwrap();
    for i in 0..4 {
        camera.send_async(camera_frame(i)).await.unwrap();
    }
    for i in 0..4 {
        let frame = tokio::time::timeout(WAIT, remote.annotated().recv_async())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.meta.pts, i);
        // no box, the ring stays blue
        assert_eq!(frame.sample(30, 10), BLUE);
    }

    assert_eq!(session.stats().detector_runs, 1);
    session.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn audio_tracks_are_drained() {
    let registry = SessionRegistry::new();
    let (session, remote) = open(&registry, LoopbackOptions::default(), None);

    let microphone = remote.add_audio_track("microphone").unwrap();
    let camera = remote.add_video_track("camera").unwrap();
    for _ in 0..20 {
        microphone
            .send_async(bytes::Bytes::from_static(&[0u8; 160]))
            .await
            .unwrap();
    }
    camera.send_async(camera_frame(42)).await.unwrap();

    let frame = tokio::time::timeout(WAIT, remote.annotated().recv_async())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame.meta.pts, 42);
    session.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connected_notification_updates_state() {
    let registry = SessionRegistry::new();
    let (session, remote) = open(&registry, LoopbackOptions::default(), None);
    assert_eq!(session.state(), SessionState::Negotiating);

    remote.set_state(PeerState::Connecting).unwrap();
    remote.set_state(PeerState::Connected).unwrap();

    let mut states = session.subscribe();
    tokio::time::timeout(WAIT, states.wait_for(|s| *s == SessionState::Connected))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(registry.len(), 1);

    session.close().await.unwrap();
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn terminal_peer_states_close_and_deregister() {
    let cases = [
        (PeerState::Disconnected, SessionState::Disconnected),
        (PeerState::Failed, SessionState::Failed),
        (PeerState::Closed, SessionState::Closed),
    ];

    for (peer_state, expected) in cases {
        let registry = SessionRegistry::new();
        let (session, remote) = open(&registry, LoopbackOptions::default(), None);
        let _camera = remote.add_video_track("camera").unwrap();

        remote.set_state(PeerState::Connected).unwrap();
        remote.set_state(peer_state).unwrap();

        let mut states = session.subscribe();
        tokio::time::timeout(WAIT, states.wait_for(|s| s.is_terminal()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.state(), expected, "{peer_state}");

        wait_until(|| registry.is_empty() && remote.close_count() == 1).await;

        // an explicit close afterwards is a no-op
        session.close().await.unwrap();
        assert_eq!(remote.close_count(), 1, "{peer_state}");
        assert_eq!(session.state(), expected, "{peer_state}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_interrupts_a_blocked_pull() {
    let registry = SessionRegistry::new();
    let (session, remote) = open(&registry, LoopbackOptions::default(), None);
    // track stays open but never delivers a frame
    let _camera = remote.add_video_track("camera").unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    session.close().await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(registry.is_empty());
    assert_eq!(remote.close_count(), 1);
    // every sender on the outbound stream is gone
    let next = tokio::time::timeout(WAIT, remote.annotated().recv_async())
        .await
        .unwrap();
    assert!(next.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_all_waits_for_slow_sessions() {
    let registry = SessionRegistry::new();
    let slow = LoopbackOptions {
        close_delay: Duration::from_millis(300),
        ..LoopbackOptions::default()
    };
    let (_a, remote_a) = open(&registry, LoopbackOptions::default(), None);
    let (_b, remote_b) = open(&registry, slow, None);
    let (_c, remote_c) = open(&registry, LoopbackOptions::default(), None);
    assert_eq!(registry.len(), 3);

    let started = Instant::now();
    let report = registry.close_all().await;

    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(report.closed, 3);
    assert!(report.failed.is_empty());
    assert!(registry.is_empty());
    for remote in [&remote_a, &remote_b, &remote_c] {
        assert_eq!(remote.close_count(), 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_all_is_idempotent() {
    let registry = SessionRegistry::new();
    let (session, _remote) = open(&registry, LoopbackOptions::default(), None);

    let first = registry.close_all().await;
    assert_eq!(first.closed, 1);
    assert!(registry.is_empty());

    let second = registry.close_all().await;
    assert_eq!(second.closed, 0);
    assert!(second.failed.is_empty());
    assert!(registry.is_empty());

    session.close().await.unwrap();
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn one_failed_close_does_not_block_the_rest() {
    let registry = SessionRegistry::new();
    let failing = LoopbackOptions {
        fail_close: true,
        ..LoopbackOptions::default()
    };
    let (_a, remote_a) = open(&registry, LoopbackOptions::default(), None);
    let (bad, remote_bad) = open(&registry, failing, None);

    let report = registry.close_all().await;

    assert_eq!(report.closed, 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, bad.id());
    assert!(matches!(report.failed[0].1, SessionError::Transport(_)));
    assert_eq!(remote_a.close_count(), 1);
    assert_eq!(remote_bad.close_count(), 1);
    assert!(registry.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn closing_a_session_removes_it() {
    let registry = SessionRegistry::new();
    let (first, _r1) = open(&registry, LoopbackOptions::default(), None);
    let (second, _r2) = open(&registry, LoopbackOptions::default(), None);
    assert_ne!(first.id(), second.id());

    first.close().await.unwrap();

    assert_eq!(registry.ids(), vec![second.id()]);
    assert!(registry.get(first.id()).is_none());
    registry.close_all().await;
}

#[tokio::test]
async fn answers_are_not_accepted_as_offers() {
    let registry = SessionRegistry::new();
    let (transport, _remotes) = LoopbackTransport::new(LoopbackOptions::default());
    let context = SessionContext::new(&Config::default(), None);

    let result = ConnectionSession::accept(
        &SessionDescription::answer("v=0"),
        &transport,
        context,
        &registry,
    );

    assert!(matches!(result, Err(SessionError::NotAnOffer(SdpType::Answer))));
    assert!(registry.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_all_waits_for_a_close_already_in_flight() {
    let registry = SessionRegistry::new();
    let detector = Arc::new(SlowDetector {
        started: AtomicUsize::new(0),
        delay: Duration::from_millis(400),
    });
    let (session, remote) = open(&registry, LoopbackOptions::default(), Some(detector.clone()));

    let camera = remote.add_video_track("camera").unwrap();
    camera.send_async(camera_frame(0)).await.unwrap();
    wait_until(|| detector.started.load(Ordering::SeqCst) == 1).await;

    let first = tokio::spawn({
        let session = session.clone();
        async move { session.close().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let report = registry.close_all().await;

    // close_all only returns once the in-flight teardown has finished
    assert_eq!(report.closed, 1);
    assert!(report.failed.is_empty());
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(remote.close_count(), 1);
    assert!(registry.is_empty());

    first.await.unwrap().unwrap();
    assert_eq!(remote.close_count(), 1);
}
