pub mod connection;
pub mod engine;
pub mod ice;
pub mod media;
pub mod types;

pub use connection::RtcPeerFactory;
pub use engine::{PeerCapability, PeerEvent, PeerEvents, PeerFactory};
pub use ice::{CandidateBuffer, HttpIceServerSource, IceServerProvider, IceServerSource};
pub use media::{MediaSource, MediaStatus, MediaStatusSync, StaticMediaSource};
pub use types::{ConnectivityState, IceCandidate, IceServer, LocalTrack, MediaKind, SdpType, SessionDescription};
