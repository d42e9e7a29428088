pub mod connection;
pub mod ice;
pub mod types;

use crate::error::{CallError, MediaError};
use async_trait::async_trait;
use tokio::sync::mpsc;

pub use connection::WebRtcPipeline;
pub use types::{
    IceCandidate, LocalTrack, MediaConstraints, PeerEvent, PeerState, SdpType, ServerConfig,
    SessionDescription, TrackKind,
};

/// The WebRTC engine as seen by the call controller.
///
/// One pipeline drives one peer connection at a time. Implementations are
/// expected to queue remote candidates that arrive before the remote
/// description and apply them once it is set.
#[async_trait]
pub trait MediaPipeline: Send + Sync {
    /// Opens local capture for the requested kinds of media.
    async fn acquire_local_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<Vec<LocalTrack>, MediaError>;

    /// Creates the peer connection, attaches local tracks and returns the
    /// stream of engine events for it.
    async fn create_peer_connection(
        &self,
        ice_servers: &[ServerConfig],
    ) -> Result<mpsc::UnboundedReceiver<PeerEvent>, CallError>;

    async fn create_offer(&self) -> Result<SessionDescription, CallError>;

    async fn create_answer(&self) -> Result<SessionDescription, CallError>;

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), CallError>;

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<(), CallError>;

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), CallError>;

    async fn local_tracks(&self) -> Vec<LocalTrack>;

    /// Enables or disables a local track; returns false for an unknown id.
    async fn set_track_enabled(&self, track_id: &str, enabled: bool) -> bool;

    async fn connection_state(&self) -> PeerState;

    /// Stops local tracks and closes the peer connection. Safe to call twice.
    async fn close(&self);
}
