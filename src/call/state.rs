use crate::peer::types::TrackKind;
use crate::session::{CallStatus, CallType, EndReason, Participant, PeerRole};
use std::fmt;

/// Local view of the call, as exposed to the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallState {
    Idle,
    Ringing,
    Accepted,
    Connected,
    Ended,
    Rejected,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Ended | CallState::Rejected)
    }

    /// Whether a call is in progress (a new one cannot start).
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            CallState::Ringing | CallState::Accepted | CallState::Connected
        )
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallState::Idle => "idle",
            CallState::Ringing => "ringing",
            CallState::Accepted => "accepted",
            CallState::Connected => "connected",
            CallState::Ended => "ended",
            CallState::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// How a call finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOutcome {
    pub status: CallStatus,
    pub reason: EndReason,
    /// Whole seconds; `None` for rejected calls
    pub duration: Option<i64>,
}

/// Events broadcast by the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    StateChanged {
        session_id: String,
        state: CallState,
    },
    RemoteTrack {
        session_id: String,
        kind: TrackKind,
    },
    /// The connection dropped and the grace period started
    ConnectionProblem { session_id: String },
    ConnectionRecovered { session_id: String },
    Ended {
        session_id: String,
        outcome: CallOutcome,
    },
}

/// Request to place a call
#[derive(Debug, Clone)]
pub struct OutgoingCall {
    pub caller: Participant,
    pub receiver: Participant,
    pub call_type: CallType,
    pub chat_room_id: Option<String>,
}

impl OutgoingCall {
    pub fn new(caller: Participant, receiver: Participant, call_type: CallType) -> Self {
        Self {
            caller,
            receiver,
            call_type,
            chat_room_id: None,
        }
    }

    pub fn in_chat_room(mut self, chat_room_id: impl Into<String>) -> Self {
        self.chat_room_id = Some(chat_room_id.into());
        self
    }
}

/// Snapshot of the active call held by a controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveCallInfo {
    pub session_id: String,
    pub role: PeerRole,
    pub call_type: CallType,
    pub state: CallState,
}
