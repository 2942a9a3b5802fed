//! One peer connection: negotiation, track loops and teardown

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use flume::{Receiver, Sender};
use thiserror::Error;
use tokio::sync::{watch, OnceCell};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};

use super::registry::{SessionRegistry, WeakRegistry};
use super::transport::{
    IncomingTrack, PeerConnection, PeerState, SdpType, SessionDescription, Transport,
    TransportError,
};
use crate::capture::Frame;
use crate::detect::Detector;
use crate::pipeline::FrameAnnotator;
use crate::{AnnotatorConfig, Config, SessionConfig};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("expected an offer, got {0:?}")]
    NotAnOffer(SdpType),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("session task failed: {0}")]
    Driver(String),
    #[error("session did not stop within {0:?}")]
    ShutdownTimeout(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pc-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Negotiating,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Disconnected | SessionState::Failed | SessionState::Closed
        )
    }
}

/// Shared inputs for every session the process creates
#[derive(Clone)]
pub struct SessionContext {
    pub annotator: AnnotatorConfig,
    pub session: SessionConfig,
    /// `None` runs color-only
    pub detector: Option<Arc<dyn Detector>>,
}

impl SessionContext {
    pub fn new(config: &Config, detector: Option<Arc<dyn Detector>>) -> Self {
        Self {
            annotator: config.annotator.clone(),
            session: config.session.clone(),
            detector,
        }
    }
}

/// Per-session counters
#[derive(Debug, Default)]
struct Counters {
    frames_annotated: AtomicU64,
    step_failures: AtomicU64,
    detector_runs: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_annotated: u64,
    pub step_failures: u64,
    pub detector_runs: u64,
}

/// What a finished track loop handled
#[derive(Debug)]
struct TrackSummary {
    track: String,
    frames: u64,
}

pub struct ConnectionSession {
    id: SessionId,
    connection: Arc<dyn PeerConnection>,
    state: watch::Sender<SessionState>,
    shutdown: watch::Sender<bool>,
    driver: Mutex<Option<JoinHandle<()>>>,
    closed: OnceCell<()>,
    released: AtomicBool,
    counters: Arc<Counters>,
    registry: WeakRegistry,
    shutdown_timeout: Duration,
}

impl ConnectionSession {
    /// Negotiate a new session from a remote offer, register it and start its
    /// event loop. Returns the session and the answer for the peer.
    ///
    /// Must be called from within a tokio runtime.
    #[instrument(skip_all)]
    pub fn accept(
        offer: &SessionDescription,
        transport: &dyn Transport,
        context: SessionContext,
        registry: &SessionRegistry,
    ) -> Result<(Arc<Self>, SessionDescription), SessionError> {
        if offer.kind != SdpType::Offer {
            return Err(SessionError::NotAnOffer(offer.kind));
        }

        let link = transport.connect(offer)?;
        let id = registry.next_id();
        let (state, _) = watch::channel(SessionState::Negotiating);
        let (shutdown, _) = watch::channel(false);

        let session = Arc::new(Self {
            id,
            connection: link.connection,
            state,
            shutdown,
            driver: Mutex::new(None),
            closed: OnceCell::new(),
            released: AtomicBool::new(false),
            counters: Arc::default(),
            registry: registry.downgrade(),
            shutdown_timeout: Duration::from_millis(context.session.shutdown_timeout_ms),
        });
        registry.add(session.clone());
        info!(session = %id, "New connection");

        let handle = tokio::spawn(session.clone().drive(link.tracks, link.states, context));
        *session.driver.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        debug!(session = %id, "Answer created");
        Ok((session, link.answer))
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            frames_annotated: self.counters.frames_annotated.load(Ordering::Relaxed),
            step_failures: self.counters.step_failures.load(Ordering::Relaxed),
            detector_runs: self.counters.detector_runs.load(Ordering::Relaxed),
        }
    }

    /// Stop all track loops, release the peer connection and leave the
    /// registry. Calls made while a close is in flight wait for it to finish;
    /// only the call that performed the teardown reports its errors.
    #[instrument(skip(self), fields(session = %self.id))]
    pub async fn close(&self) -> Result<(), SessionError> {
        let mut outcome = Ok(());
        let slot = &mut outcome;
        self.closed
            .get_or_init(|| async move {
                *slot = self.teardown().await;
            })
            .await;
        outcome
    }

    async fn teardown(&self) -> Result<(), SessionError> {
        self.shutdown.send_replace(true);
        let driver = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let mut result = Ok(());
        if let Some(mut handle) = driver {
            match tokio::time::timeout(self.shutdown_timeout, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => result = Err(SessionError::Driver(e.to_string())),
                Err(_) => {
                    warn!("Track loops did not stop in time, aborting");
                    handle.abort();
                    result = Err(SessionError::ShutdownTimeout(self.shutdown_timeout));
                }
            }
        }

        self.transition(SessionState::Closed);
        self.deregister();
        let released = self.release().await;
        info!("Session closed");
        result.and(released)
    }

    /// Event loop: dispatches transport notifications and new tracks until
    /// shutdown or a terminal peer state
    async fn drive(
        self: Arc<Self>,
        tracks: Receiver<IncomingTrack>,
        states: Receiver<PeerState>,
        context: SessionContext,
    ) {
        let mut shutdown = self.shutdown.subscribe();
        let mut workers: JoinSet<TrackSummary> = JoinSet::new();
        let mut tracks_open = true;
        let mut states_open = true;

        let terminal = loop {
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break None,
                state = states.recv_async(), if states_open => match state {
                    Ok(state) => {
                        if let Some(terminal) = self.on_peer_state(state) {
                            break Some(terminal);
                        }
                    }
                    Err(_) => states_open = false,
                },
                track = tracks.recv_async(), if tracks_open => match track {
                    Ok(track) => self.on_track(track, &mut workers, &context),
                    Err(_) => tracks_open = false,
                },
                Some(finished) = workers.join_next(), if !workers.is_empty() => {
                    log_track_exit(self.id, finished);
                }
            }
        };

        self.shutdown.send_replace(true);
        while let Some(finished) = workers.join_next().await {
            log_track_exit(self.id, finished);
        }

        if let Some(terminal) = terminal {
            self.transition(terminal);
            self.deregister();
            if let Err(e) = self.release().await {
                warn!(session = %self.id, "Failed to close peer connection: {}", e);
            }
            info!(session = %self.id, state = ?terminal, "Session ended by transport");
        }
    }

    /// Returns the terminal state to enter, if any
    fn on_peer_state(&self, state: PeerState) -> Option<SessionState> {
        info!(session = %self.id, %state, "Connection state");
        match state {
            PeerState::New | PeerState::Connecting => None,
            PeerState::Connected => {
                self.transition(SessionState::Connected);
                None
            }
            PeerState::Disconnected => Some(SessionState::Disconnected),
            PeerState::Failed => Some(SessionState::Failed),
            PeerState::Closed => Some(SessionState::Closed),
        }
    }

    fn on_track(
        &self,
        track: IncomingTrack,
        workers: &mut JoinSet<TrackSummary>,
        context: &SessionContext,
    ) {
        match track {
            IncomingTrack::Video { id, frames } => {
                info!(session = %self.id, track = %id, "Video track received");
                let outbound = match self.connection.attach_video(&id) {
                    Ok(outbound) => outbound,
                    Err(e) => {
                        warn!(session = %self.id, track = %id, "Cannot send track back: {}", e);
                        return;
                    }
                };
                let annotator = FrameAnnotator::new(&context.annotator, context.detector.clone());
                workers.spawn(annotate_track(
                    id,
                    annotator,
                    frames,
                    outbound,
                    self.shutdown.subscribe(),
                    self.counters.clone(),
                ));
            }
            IncomingTrack::Other { id, kind, packets } => {
                info!(session = %self.id, track = %id, %kind, "Discarding non-video track");
                workers.spawn(drain_track(id, packets, self.shutdown.subscribe()));
            }
        }
    }

    fn transition(&self, next: SessionState) {
        let changed = self.state.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            debug!(session = %self.id, state = ?next, "Session state changed");
        }
    }

    fn deregister(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }

    /// Close the peer connection exactly once
    async fn release(&self) -> Result<(), SessionError> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.connection.close().await?;
        Ok(())
    }
}

/// Pull, annotate, push, in arrival order, until the track ends, the peer
/// stops receiving or the session shuts down
async fn annotate_track(
    track: String,
    mut annotator: FrameAnnotator,
    frames: Receiver<Frame>,
    outbound: Sender<Frame>,
    mut shutdown: watch::Receiver<bool>,
    counters: Arc<Counters>,
) -> TrackSummary {
    let mut frame_counter: u64 = 0;
    let mut detector_runs = annotator.cache().runs();

    loop {
        let mut frame = tokio::select! {
            biased;
            _ = shutdown.wait_for(|stop| *stop) => break,
            next = frames.recv_async() => match next {
                Ok(frame) => frame,
                Err(_) => {
                    debug!(%track, "Track ended");
                    break;
                }
            },
        };
        let frame_index = frame_counter;
        frame_counter += 1;

        // CPU-bound; the frame and annotator move to the blocking pool and back
        let job = tokio::task::spawn_blocking(move || {
            let report = annotator.annotate(&mut frame, frame_index);
            (annotator, frame, report)
        });
        let (returned, frame, report) = match job.await {
            Ok(done) => done,
            Err(e) => {
                error!(%track, frame_index, "Annotation task failed: {}", e);
                break;
            }
        };
        annotator = returned;

        let runs = annotator.cache().runs();
        counters.detector_runs.fetch_add(runs - detector_runs, Ordering::Relaxed);
        detector_runs = runs;
        counters.frames_annotated.fetch_add(1, Ordering::Relaxed);
        counters
            .step_failures
            .fetch_add(report.errors.len() as u64, Ordering::Relaxed);
        metrics::counter!("frames_annotated").increment(1);
        metrics::histogram!("frame_latency_ms").record(frame.received_at.elapsed().as_millis() as f64);

        let sent = tokio::select! {
            biased;
            _ = shutdown.wait_for(|stop| *stop) => false,
            sent = outbound.send_async(frame) => sent.is_ok(),
        };
        if !sent {
            debug!(%track, "Outbound stream closed");
            break;
        }
    }

    TrackSummary {
        track,
        frames: frame_counter,
    }
}

/// Consume a non-video track so the transport never backs up on it
async fn drain_track(
    track: String,
    packets: Receiver<Bytes>,
    mut shutdown: watch::Receiver<bool>,
) -> TrackSummary {
    let mut frames = 0;
    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait_for(|stop| *stop) => break,
            next = packets.recv_async() => match next {
                Ok(_) => frames += 1,
                Err(_) => break,
            },
        }
    }
    TrackSummary { track, frames }
}

fn log_track_exit(session: SessionId, finished: Result<TrackSummary, tokio::task::JoinError>) {
    match finished {
        Ok(summary) => info!(
            %session,
            track = %summary.track,
            frames = summary.frames,
            "Track loop finished"
        ),
        Err(e) => error!(%session, "Track loop failed: {}", e),
    }
}
