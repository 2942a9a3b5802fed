//! In-process transport: the "remote peer" is a set of channels the caller
//! drives directly. Backs the demo binary and the session tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use flume::{Receiver, Sender};
use futures::future::BoxFuture;
use tracing::debug;

use super::transport::{
    IncomingTrack, PeerConnection, PeerLink, PeerState, SessionDescription, Transport,
    TransportError,
};
use crate::capture::Frame;

#[derive(Debug, Clone)]
pub struct LoopbackOptions {
    /// Capacity of each frame channel
    pub buffer: usize,
    /// Simulated teardown latency
    pub close_delay: Duration,
    /// Make every close report an error
    pub fail_close: bool,
}

impl Default for LoopbackOptions {
    fn default() -> Self {
        Self {
            buffer: 8,
            close_delay: Duration::ZERO,
            fail_close: false,
        }
    }
}

pub struct LoopbackTransport {
    options: LoopbackOptions,
    remotes: Sender<RemotePeer>,
}

impl LoopbackTransport {
    /// The receiver yields the remote end of every connection made
    pub fn new(options: LoopbackOptions) -> (Self, Receiver<RemotePeer>) {
        let (remotes, rx) = flume::unbounded();
        (Self { options, remotes }, rx)
    }
}

impl Transport for LoopbackTransport {
    fn connect(&self, offer: &SessionDescription) -> Result<PeerLink, TransportError> {
        if offer.sdp.trim().is_empty() {
            return Err(TransportError::Negotiation("empty SDP".into()));
        }

        let buffer = self.options.buffer.max(1);
        let (tracks_tx, tracks_rx) = flume::unbounded();
        let (states_tx, states_rx) = flume::unbounded();
        let (outbound_tx, outbound_rx) = flume::bounded(buffer);
        let closes = Arc::new(AtomicUsize::new(0));

        let connection = Arc::new(LoopbackConnection {
            outbound: Mutex::new(Some(outbound_tx)),
            closes: closes.clone(),
            options: self.options.clone(),
        });
        let remote = RemotePeer {
            tracks: tracks_tx,
            states: states_tx,
            annotated: outbound_rx,
            closes,
            buffer,
        };
        self.remotes
            .send(remote)
            .map_err(|_| TransportError::Negotiation("remote side is gone".into()))?;

        Ok(PeerLink {
            answer: SessionDescription::answer(offer.sdp.clone()),
            connection,
            tracks: tracks_rx,
            states: states_rx,
        })
    }
}

struct LoopbackConnection {
    outbound: Mutex<Option<Sender<Frame>>>,
    closes: Arc<AtomicUsize>,
    options: LoopbackOptions,
}

impl PeerConnection for LoopbackConnection {
    fn attach_video(&self, source_track: &str) -> Result<Sender<Frame>, TransportError> {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| TransportError::Attach {
                track: source_track.to_string(),
                reason: "connection closed".into(),
            })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            self.outbound
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if !self.options.close_delay.is_zero() {
                tokio::time::sleep(self.options.close_delay).await;
            }
            self.closes.fetch_add(1, Ordering::SeqCst);
            debug!("Loopback connection closed");
            if self.options.fail_close {
                return Err(TransportError::Close("simulated close failure".into()));
            }
            Ok(())
        })
    }
}

/// The far end of a loopback connection
pub struct RemotePeer {
    tracks: Sender<IncomingTrack>,
    states: Sender<PeerState>,
    annotated: Receiver<Frame>,
    closes: Arc<AtomicUsize>,
    buffer: usize,
}

impl RemotePeer {
    /// Publish a video track; dropping the sender ends it
    pub fn add_video_track(&self, id: &str) -> Result<Sender<Frame>, TransportError> {
        let (tx, frames) = flume::bounded(self.buffer);
        self.tracks
            .send(IncomingTrack::Video {
                id: id.to_string(),
                frames,
            })
            .map_err(|_| TransportError::Disconnected)?;
        Ok(tx)
    }

    pub fn add_audio_track(&self, id: &str) -> Result<Sender<Bytes>, TransportError> {
        let (tx, packets) = flume::bounded(self.buffer);
        self.tracks
            .send(IncomingTrack::Other {
                id: id.to_string(),
                kind: "audio".into(),
                packets,
            })
            .map_err(|_| TransportError::Disconnected)?;
        Ok(tx)
    }

    /// Report a connection state change to the session
    pub fn set_state(&self, state: PeerState) -> Result<(), TransportError> {
        self.states
            .send(state)
            .map_err(|_| TransportError::Disconnected)
    }

    /// Annotated frames sent back by the session
    pub fn annotated(&self) -> &Receiver<Frame> {
        &self.annotated
    }

    /// How many times the local side closed this connection
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}
