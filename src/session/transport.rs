//! Seam between sessions and the media transport (signaling, tracks, peer
//! connection state)

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use flume::{Receiver, Sender};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capture::Frame;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("negotiation failed: {0}")]
    Negotiation(String),
    #[error("cannot attach track {track}: {reason}")]
    Attach { track: String, reason: String },
    #[error("peer connection closed")]
    Disconnected,
    #[error("close failed: {0}")]
    Close(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// Offer or answer as exchanged with the signaling endpoint:
/// `{"sdp": "...", "type": "offer"}`. The SDP body is opaque here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: SdpType,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            kind: SdpType::Offer,
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            kind: SdpType::Answer,
        }
    }
}

/// Connection state as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PeerState::New => "new",
            PeerState::Connecting => "connecting",
            PeerState::Connected => "connected",
            PeerState::Disconnected => "disconnected",
            PeerState::Failed => "failed",
            PeerState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Remote media track. The channel closes when the track ends.
pub enum IncomingTrack {
    Video {
        id: String,
        frames: Receiver<Frame>,
    },
    /// Audio or data; drained without processing
    Other {
        id: String,
        kind: String,
        packets: Receiver<Bytes>,
    },
}

/// One negotiated peer connection
pub trait PeerConnection: Send + Sync {
    /// Start sending a video track back to the peer
    fn attach_video(&self, source_track: &str) -> Result<Sender<Frame>, TransportError>;

    /// Tear down the connection. Called at most once per session.
    fn close(&self) -> BoxFuture<'_, Result<(), TransportError>>;
}

/// Everything a session needs from a freshly negotiated connection
pub struct PeerLink {
    pub answer: SessionDescription,
    pub connection: Arc<dyn PeerConnection>,
    pub tracks: Receiver<IncomingTrack>,
    pub states: Receiver<PeerState>,
}

/// Turns a remote offer into a live connection
pub trait Transport: Send + Sync {
    fn connect(&self, offer: &SessionDescription) -> Result<PeerLink, TransportError>;
}
