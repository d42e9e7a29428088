//! Call session documents as stored in the signaling store.

use crate::peer::types::{IceCandidate, MediaConstraints, SessionDescription};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Voice,
    Video,
}

impl CallType {
    pub fn constraints(&self) -> MediaConstraints {
        MediaConstraints {
            audio: true,
            video: matches!(self, CallType::Video),
        }
    }
}

/// Persisted status of a call session
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Ringing,
    Accepted,
    Rejected,
    Ended,
}

impl CallStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Rejected | CallStatus::Ended)
    }

    /// Status only moves forward; nothing returns to ringing.
    pub fn can_transition_to(&self, next: CallStatus) -> bool {
        use CallStatus::*;
        matches!(
            (self, next),
            (Ringing, Accepted) | (Ringing, Rejected) | (Ringing, Ended) | (Accepted, Ended)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Ringing => "ringing",
            CallStatus::Accepted => "accepted",
            CallStatus::Rejected => "rejected",
            CallStatus::Ended => "ended",
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session reached a terminal status
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Hangup,
    Cancelled,
    Rejected,
    Timeout,
    StaleCleanup,
    RemoteHangup,
    ConnectionFailed,
}

/// Which side of the call a party is on
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    Caller,
    Receiver,
}

impl PeerRole {
    pub fn opposite(&self) -> PeerRole {
        match self {
            PeerRole::Caller => PeerRole::Receiver,
            PeerRole::Receiver => PeerRole::Caller,
        }
    }
}

/// Identity shown on the other side of the call
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: String,
    pub name: String,
    pub photo_url: Option<String>,
}

impl Participant {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            photo_url: None,
        }
    }

    pub fn with_photo(mut self, url: impl Into<String>) -> Self {
        self.photo_url = Some(url.into());
        self
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CallSession {
    pub id: String,
    pub caller_id: String,
    pub caller_name: String,
    pub caller_photo_url: Option<String>,
    pub receiver_id: String,
    pub receiver_name: String,
    pub receiver_photo_url: Option<String>,
    #[serde(rename = "type")]
    pub call_type: CallType,
    pub status: CallStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Whole seconds between `started_at` and `ended_at`
    pub duration: Option<i64>,
    pub offer: Option<SessionDescription>,
    pub answer: Option<SessionDescription>,
    pub chat_room_id: Option<String>,
    pub end_reason: Option<EndReason>,
    pub expire_at: DateTime<Utc>,
}

impl CallSession {
    pub fn caller(&self) -> Participant {
        Participant {
            id: self.caller_id.clone(),
            name: self.caller_name.clone(),
            photo_url: self.caller_photo_url.clone(),
        }
    }

    pub fn receiver(&self) -> Participant {
        Participant {
            id: self.receiver_id.clone(),
            name: self.receiver_name.clone(),
            photo_url: self.receiver_photo_url.clone(),
        }
    }

    /// Ringing for longer than `window` as of `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, window: std::time::Duration) -> bool {
        self.status == CallStatus::Ringing && crate::utils::add_window(self.created_at, window) < now
    }
}

/// Partial write applied to a session document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionUpdate {
    pub status: Option<CallStatus>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration: Option<i64>,
    pub answer: Option<SessionDescription>,
    pub end_reason: Option<EndReason>,
}

impl SessionUpdate {
    pub fn status(status: CallStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Terminal write: status, end time, duration and reason together.
    pub fn terminal(
        status: CallStatus,
        ended_at: DateTime<Utc>,
        duration: Option<i64>,
        reason: EndReason,
    ) -> Self {
        Self {
            status: Some(status),
            ended_at: Some(ended_at),
            duration,
            end_reason: Some(reason),
            ..Default::default()
        }
    }

    pub fn apply(&self, session: &mut CallSession) {
        if let Some(status) = self.status {
            session.status = status;
        }
        if let Some(at) = self.started_at {
            session.started_at = Some(at);
        }
        if let Some(at) = self.ended_at {
            session.ended_at = Some(at);
        }
        if let Some(duration) = self.duration {
            session.duration = Some(duration);
        }
        if let Some(answer) = &self.answer {
            session.answer = Some(answer.clone());
        }
        if let Some(reason) = self.end_reason {
            session.end_reason = Some(reason);
        }
    }
}

/// One ICE candidate published by a peer under a session
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidateRecord {
    #[serde(flatten)]
    pub candidate: IceCandidate,
    pub role: PeerRole,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample(created_at: DateTime<Utc>) -> CallSession {
        CallSession {
            id: "c1".into(),
            caller_id: "a".into(),
            caller_name: "Alice".into(),
            caller_photo_url: None,
            receiver_id: "b".into(),
            receiver_name: "Bob".into(),
            receiver_photo_url: Some("https://img/b.png".into()),
            call_type: CallType::Video,
            status: CallStatus::Ringing,
            created_at,
            started_at: None,
            ended_at: None,
            duration: None,
            offer: Some(SessionDescription::offer("v=0")),
            answer: None,
            chat_room_id: Some("room-1".into()),
            end_reason: None,
            expire_at: created_at + chrono::Duration::hours(24),
        }
    }

    #[test]
    fn status_transitions_are_monotonic() {
        use CallStatus::*;
        assert!(Ringing.can_transition_to(Accepted));
        assert!(Accepted.can_transition_to(Ended));
        assert!(!Accepted.can_transition_to(Ringing));
        assert!(!Accepted.can_transition_to(Rejected));
        assert!(!Ended.can_transition_to(Ended));
        assert!(!Rejected.can_transition_to(Accepted));
    }

    #[test]
    fn document_uses_store_field_names() {
        let session = sample(Utc::now());
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["type"], "video");
        assert_eq!(json["status"], "ringing");
        assert_eq!(json["callerId"], "a");
        assert_eq!(json["receiverPhotoUrl"], "https://img/b.png");
        assert_eq!(json["offer"]["type"], "offer");
        assert_eq!(json["chatRoomId"], "room-1");
        assert!(json.get("expireAt").is_some());
    }

    #[test]
    fn staleness_only_applies_to_ringing() {
        let created = Utc::now() - chrono::Duration::seconds(61);
        let mut session = sample(created);
        assert!(session.is_stale(Utc::now(), Duration::from_secs(60)));
        session.status = CallStatus::Accepted;
        assert!(!session.is_stale(Utc::now(), Duration::from_secs(60)));
    }

    #[test]
    fn candidate_record_flattens_candidate_fields() {
        let record = IceCandidateRecord {
            candidate: IceCandidate {
                candidate: "candidate:1 1 udp 2122260223 10.0.0.2 50000 typ host".into(),
                sdp_mid: Some("0".into()),
                sdp_mline_index: Some(0),
            },
            role: PeerRole::Receiver,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["role"], "receiver");
        assert_eq!(json["sdpMid"], "0");
        assert_eq!(json["sdpMLineIndex"], 0);
    }
}
