//! Peer sessions and the process-wide registry

pub mod loopback;
pub mod registry;
#[allow(clippy::module_inception)]
pub mod session;
pub mod transport;

pub use registry::{SessionRegistry, ShutdownReport};
pub use session::{
    ConnectionSession, SessionContext, SessionError, SessionId, SessionState, SessionStats,
};
pub use transport::{
    IncomingTrack, PeerConnection, PeerLink, PeerState, SdpType, SessionDescription, Transport,
    TransportError,
};
