#![allow(dead_code)]

use async_trait::async_trait;
use callsession::call::{CallSessionController, ManualClock};
use callsession::error::{CallError, MediaError, NotifyError, StoreError};
use callsession::notify::{Notifier, ReminderRecord};
use callsession::peer::types::{
    IceCandidate, LocalTrack, MediaConstraints, PeerEvent, PeerState, ServerConfig,
    SessionDescription, TrackKind,
};
use callsession::peer::MediaPipeline;
use callsession::session::{
    CallSession, CallStatus, CallType, IceCandidateRecord, Participant, PeerRole, SessionUpdate,
};
use callsession::signaling::{
    InMemorySignalingStore, SessionChange, SessionQuery, SignalingStore, Subscription,
};
use callsession::CallConfig;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default)]
struct FakeState {
    events: Option<mpsc::UnboundedSender<PeerEvent>>,
    tracks: Vec<LocalTrack>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    candidates: Vec<IceCandidate>,
    peer_state: Option<PeerState>,
    closed: usize,
}

/// Scripted pipeline: produces deterministic SDP, records what it is given
/// and lets tests push engine events.
pub struct FakeMediaPipeline {
    label: String,
    failure: Option<MediaError>,
    state: Mutex<FakeState>,
}

impl FakeMediaPipeline {
    pub fn new(label: &str) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            failure: None,
            state: Mutex::new(FakeState::default()),
        })
    }

    pub fn failing(label: &str, failure: MediaError) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            failure: Some(failure),
            state: Mutex::new(FakeState::default()),
        })
    }

    pub fn host_candidate(&self) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate:{} 1 udp 2122260223 10.0.0.1 5000 typ host", self.label),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        }
    }

    pub fn emit(&self, event: PeerEvent) {
        let mut state = self.state.lock().unwrap();
        if let PeerEvent::StateChanged(peer_state) = event {
            state.peer_state = Some(peer_state);
        }
        if let Some(tx) = state.events.as_ref() {
            let _ = tx.send(event);
        }
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().unwrap().remote.clone()
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().unwrap().local.clone()
    }

    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.state.lock().unwrap().candidates.clone()
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().unwrap().closed
    }
}

#[async_trait]
impl MediaPipeline for FakeMediaPipeline {
    async fn acquire_local_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<Vec<LocalTrack>, MediaError> {
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        let mut tracks = vec![LocalTrack {
            id: format!("{}-audio", self.label),
            kind: TrackKind::Audio,
            enabled: true,
        }];
        if constraints.video {
            tracks.push(LocalTrack {
                id: format!("{}-video", self.label),
                kind: TrackKind::Video,
                enabled: true,
            });
        }
        self.state.lock().unwrap().tracks = tracks.clone();
        Ok(tracks)
    }

    async fn create_peer_connection(
        &self,
        _ice_servers: &[ServerConfig],
    ) -> Result<mpsc::UnboundedReceiver<PeerEvent>, CallError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(PeerEvent::LocalCandidate(self.host_candidate()));
        let mut state = self.state.lock().unwrap();
        state.events = Some(tx);
        state.peer_state = Some(PeerState::New);
        Ok(rx)
    }

    async fn create_offer(&self) -> Result<SessionDescription, CallError> {
        Ok(SessionDescription::offer(format!("v=0 {}-offer", self.label)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, CallError> {
        Ok(SessionDescription::answer(format!("v=0 {}-answer", self.label)))
    }

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), CallError> {
        self.state.lock().unwrap().local = Some(desc.clone());
        Ok(())
    }

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<(), CallError> {
        self.state.lock().unwrap().remote = Some(desc.clone());
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), CallError> {
        self.state.lock().unwrap().candidates.push(candidate.clone());
        Ok(())
    }

    async fn local_tracks(&self) -> Vec<LocalTrack> {
        self.state.lock().unwrap().tracks.clone()
    }

    async fn set_track_enabled(&self, track_id: &str, enabled: bool) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.tracks.iter_mut().find(|t| t.id == track_id) {
            Some(track) => {
                track.enabled = enabled;
                true
            }
            None => false,
        }
    }

    async fn connection_state(&self) -> PeerState {
        self.state
            .lock()
            .unwrap()
            .peer_state
            .unwrap_or(PeerState::Closed)
    }

    async fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed += 1;
        state.events = None;
        state.tracks.clear();
        state.peer_state = Some(PeerState::Closed);
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    records: Mutex<Vec<ReminderRecord>>,
}

impl RecordingNotifier {
    pub fn records(&self) -> Vec<ReminderRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, record: ReminderRecord) -> Result<(), NotifyError> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}

pub fn alice() -> Participant {
    Participant::new("alice", "Alice Liddell").with_photo("https://cdn.example/alice.png")
}

pub fn bob() -> Participant {
    Participant::new("bob", "Bob Marsh")
}

/// Notifier whose backend is always down
#[derive(Default)]
pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn notify(&self, _record: ReminderRecord) -> Result<(), NotifyError> {
        Err(NotifyError::Unavailable("push gateway offline".into()))
    }
}

/// Store view whose session watches stall after the initial snapshot, like a
/// listener on a device that lost its change feed. Writes still go through.
pub struct LaggingStore {
    inner: Arc<InMemorySignalingStore>,
    stalled: Mutex<Vec<mpsc::UnboundedSender<SessionChange>>>,
}

impl LaggingStore {
    pub fn new(inner: Arc<InMemorySignalingStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            stalled: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl SignalingStore for LaggingStore {
    async fn create_session(&self, session: &CallSession) -> Result<(), StoreError> {
        self.inner.create_session(session).await
    }

    async fn get_session(&self, id: &str) -> Result<Option<CallSession>, StoreError> {
        self.inner.get_session(id).await
    }

    async fn update_session(&self, id: &str, update: &SessionUpdate) -> Result<(), StoreError> {
        self.inner.update_session(id, update).await
    }

    async fn transition_session(
        &self,
        id: &str,
        expected: &[CallStatus],
        update: &SessionUpdate,
    ) -> Result<bool, StoreError> {
        self.inner.transition_session(id, expected, update).await
    }

    async fn watch_session(&self, id: &str) -> Result<Subscription<SessionChange>, StoreError> {
        let mut live = self.inner.watch_session(id).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(first) = live.next().await {
            let _ = tx.send(first);
        }
        self.stalled.lock().unwrap().push(tx);
        Ok(Subscription::new(rx))
    }

    async fn add_candidate(
        &self,
        session_id: &str,
        record: &IceCandidateRecord,
    ) -> Result<(), StoreError> {
        self.inner.add_candidate(session_id, record).await
    }

    async fn watch_candidates(
        &self,
        session_id: &str,
        role: PeerRole,
    ) -> Result<Subscription<IceCandidateRecord>, StoreError> {
        self.inner.watch_candidates(session_id, role).await
    }

    async fn query_sessions(&self, query: &SessionQuery) -> Result<Vec<CallSession>, StoreError> {
        self.inner.query_sessions(query).await
    }

    async fn delete_session(&self, id: &str) -> Result<(), StoreError> {
        self.inner.delete_session(id).await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        self.inner.purge_expired(now).await
    }
}

/// Two controllers sharing one store, as two devices would.
pub struct Pair {
    pub store: Arc<InMemorySignalingStore>,
    pub clock: ManualClock,
    pub notifier: Arc<RecordingNotifier>,
    pub caller_media: Arc<FakeMediaPipeline>,
    pub receiver_media: Arc<FakeMediaPipeline>,
    pub caller: CallSessionController,
    pub receiver: CallSessionController,
}

impl Pair {
    pub fn new() -> Self {
        Self::with_config(CallConfig::default())
    }

    pub fn with_config(config: CallConfig) -> Self {
        let store = Arc::new(InMemorySignalingStore::new());
        Self::build(store.clone(), store, config)
    }

    /// Caller sees the store through a stalled session watch.
    pub fn with_lagging_caller() -> Self {
        let store = Arc::new(InMemorySignalingStore::new());
        let lagging = LaggingStore::new(store.clone());
        Self::build(store, lagging, CallConfig::default())
    }

    fn build(
        store: Arc<InMemorySignalingStore>,
        caller_store: Arc<dyn SignalingStore>,
        config: CallConfig,
    ) -> Self {
        let clock = ManualClock::new(Utc::now());
        let notifier = Arc::new(RecordingNotifier::default());
        let caller_media = FakeMediaPipeline::new("alice");
        let receiver_media = FakeMediaPipeline::new("bob");

        let caller = CallSessionController::builder(caller_store, caller_media.clone())
            .config(config.clone())
            .clock(Arc::new(clock.clone()))
            .notifier(notifier.clone())
            .build();
        let receiver = CallSessionController::builder(store.clone(), receiver_media.clone())
            .config(config)
            .clock(Arc::new(clock.clone()))
            .notifier(notifier.clone())
            .build();

        Self {
            store,
            clock,
            notifier,
            caller_media,
            receiver_media,
            caller,
            receiver,
        }
    }

    pub async fn doc(&self, id: &str) -> CallSession {
        self.store.get_session(id).await.unwrap().unwrap()
    }
}

/// Polls `check` until it holds or `within` passes.
pub async fn eventually<F: Fn() -> bool>(check: F, within: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

pub fn ringing_session(
    id: &str,
    caller: &str,
    receiver: &str,
    created_at: DateTime<Utc>,
) -> CallSession {
    CallSession {
        id: id.into(),
        caller_id: caller.into(),
        caller_name: caller.to_uppercase(),
        caller_photo_url: None,
        receiver_id: receiver.into(),
        receiver_name: receiver.to_uppercase(),
        receiver_photo_url: None,
        call_type: CallType::Voice,
        status: CallStatus::Ringing,
        created_at,
        started_at: None,
        ended_at: None,
        duration: None,
        offer: Some(SessionDescription::offer("v=0")),
        answer: None,
        chat_room_id: None,
        end_reason: None,
        expire_at: created_at + chrono::Duration::hours(24),
    }
}
