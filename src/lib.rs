//! Call session signaling and lifecycle.
//!
//! A [`CallSessionController`] drives one voice or video call: it writes the
//! session document and SDP offer/answer to a [`SignalingStore`], trades ICE
//! candidates through the same store, and drives a [`MediaPipeline`] for the
//! actual WebRTC work. [`CallRegistry`] covers the observer side (incoming
//! listings, stale cleanup, history).

pub mod call;
pub mod config;
pub mod error;
pub mod logger;
pub mod notify;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;

pub use call::{
    CallEvent, CallOutcome, CallRegistry, CallSessionController, CallState, Clock, ManualClock,
    OutgoingCall, SystemClock,
};
pub use config::CallConfig;
pub use error::{
    CallError, CallResult, ConfigError, MediaError, MediaErrorKind, NotifyError, StoreError,
};
pub use notify::{LogNotifier, Notifier, ReminderKind, ReminderRecord};
pub use peer::{MediaPipeline, WebRtcPipeline};
pub use session::{
    CallSession, CallStatus, CallType, EndReason, IceCandidateRecord, Participant, PeerRole,
    SessionUpdate,
};
pub use signaling::{InMemorySignalingStore, SessionChange, SessionQuery, SignalingStore, Subscription};
