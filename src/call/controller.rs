//! Lifecycle of one call attempt.
//!
//! ```text
//! idle ──start_call──▶ ringing ──answer seen──▶ accepted ──remote sdp set──▶ connected
//!                         │                        │                            │
//!                         ├── reject ──▶ rejected   └──────── end/failure ───────┴──▶ ended
//!                         └── timeout / cancel ──▶ ended
//! ```
//!
//! The receiver enters at `accepted` through [`CallSessionController::accept_call`]
//! and moves to `connected` once the peer connection reports it.
//!
//! Every terminal status is written with a conditional transition against the
//! stored status, so when both sides race the first write wins and the loser
//! reports the winner's outcome. The local view may lag the store; a ring
//! timeout that finds the call already accepted leaves it up. Teardown is guarded by an ending flag and runs at most once per
//! call.

use crate::call::clock::{Clock, SystemClock};
use crate::call::state::{ActiveCallInfo, CallEvent, CallOutcome, CallState, OutgoingCall};
use crate::config::CallConfig;
use crate::error::{CallError, CallResult, StoreError};
use crate::logger::dump_session;
use crate::notify::{LogNotifier, Notifier, ReminderRecord};
use crate::peer::types::{PeerEvent, PeerState, SessionDescription, TrackKind};
use crate::peer::MediaPipeline;
use crate::session::{
    CallSession, CallStatus, EndReason, IceCandidateRecord, PeerRole, SessionUpdate,
};
use crate::signaling::{SessionChange, SignalingStore, Subscription};
use crate::utils::{add_window, random_id, whole_seconds_between};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 64;

/// Statuses a call can still be ended from
const LIVE: [CallStatus; 2] = [CallStatus::Ringing, CallStatus::Accepted];

struct ActiveCall {
    session: CallSession,
    role: PeerRole,
    answer_applied: bool,
    timeout_task: Option<JoinHandle<()>>,
    grace_task: Option<JoinHandle<()>>,
    listeners: Vec<JoinHandle<()>>,
}

impl ActiveCall {
    fn new(session: CallSession, role: PeerRole) -> Self {
        Self {
            session,
            role,
            answer_applied: false,
            timeout_task: None,
            grace_task: None,
            listeners: Vec::new(),
        }
    }

    fn id(&self) -> &str {
        &self.session.id
    }

    fn stop_tasks(&mut self) {
        if let Some(handle) = self.timeout_task.take() {
            handle.abort();
        }
        if let Some(handle) = self.grace_task.take() {
            handle.abort();
        }
        for handle in self.listeners.drain(..) {
            handle.abort();
        }
    }
}

/// Result of trying to write a terminal status
enum Settled {
    Written(CallOutcome),
    /// A terminal status was already stored
    Lost(CallSession),
    /// The receiver accepted before the timeout write
    Answered(CallSession),
    Gone,
    Failed(StoreError),
}

struct Inner {
    store: Arc<dyn SignalingStore>,
    media: Arc<dyn MediaPipeline>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: CallConfig,
    state_tx: watch::Sender<CallState>,
    events_tx: broadcast::Sender<CallEvent>,
    ending: AtomicBool,
    call: Mutex<Option<ActiveCall>>,
}

/// Owns one call at a time. Cheap to clone; clones share the call.
#[derive(Clone)]
pub struct CallSessionController {
    inner: Arc<Inner>,
}

pub struct CallControllerBuilder {
    store: Arc<dyn SignalingStore>,
    media: Arc<dyn MediaPipeline>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: CallConfig,
}

impl CallControllerBuilder {
    pub fn config(mut self, config: CallConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn build(self) -> CallSessionController {
        let (state_tx, _) = watch::channel(CallState::Idle);
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        CallSessionController {
            inner: Arc::new(Inner {
                store: self.store,
                media: self.media,
                notifier: self.notifier,
                clock: self.clock,
                config: self.config,
                state_tx,
                events_tx,
                ending: AtomicBool::new(false),
                call: Mutex::new(None),
            }),
        }
    }
}

impl CallSessionController {
    pub fn builder(
        store: Arc<dyn SignalingStore>,
        media: Arc<dyn MediaPipeline>,
    ) -> CallControllerBuilder {
        CallControllerBuilder {
            store,
            media,
            notifier: Arc::new(LogNotifier),
            clock: Arc::new(SystemClock),
            config: CallConfig::default(),
        }
    }

    pub fn state(&self) -> CallState {
        *self.inner.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<CallState> {
        self.inner.state_tx.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<CallEvent> {
        self.inner.events_tx.subscribe()
    }

    pub async fn active_call(&self) -> Option<ActiveCallInfo> {
        let slot = self.inner.call.lock().await;
        slot.as_ref().map(|active| ActiveCallInfo {
            session_id: active.session.id.clone(),
            role: active.role,
            call_type: active.session.call_type,
            state: self.state(),
        })
    }

    /// Waits until the state satisfies `pred`.
    pub async fn wait_for_state<F>(&self, pred: F, within: Duration) -> CallResult<CallState>
    where
        F: Fn(CallState) -> bool,
    {
        let mut rx = self.inner.state_tx.subscribe();
        let wait = async {
            loop {
                let state = *rx.borrow_and_update();
                if pred(state) {
                    return Ok(state);
                }
                if rx.changed().await.is_err() {
                    return Err(CallError::invalid_state("controller dropped"));
                }
            }
        };
        tokio::time::timeout(within, wait)
            .await
            .map_err(|_| CallError::Timeout {
                seconds: within.as_secs(),
            })?
    }

    /// Places a call: idle → ringing.
    pub async fn start_call(&self, request: OutgoingCall) -> CallResult<CallSession> {
        let inner = &self.inner;
        let mut slot = inner.call.lock().await;
        if slot.is_some() {
            return Err(CallError::Busy);
        }
        inner.ending.store(false, Ordering::SeqCst);

        inner
            .media
            .acquire_local_media(request.call_type.constraints())
            .await
            .inspect_err(|e| warn!(kind = %e.kind, "local media unavailable: {}", e.detail))?;

        let (session, events) = match inner.prepare_outgoing(&request).await {
            Ok(prepared) => prepared,
            Err(e) => {
                inner.media.close().await;
                return Err(e);
            }
        };
        let session_id = session.id.clone();

        let listeners = match inner.spawn_listeners(&session_id, PeerRole::Caller, events).await {
            Ok(listeners) => listeners,
            Err(e) => {
                inner.abandon(&session_id).await;
                inner.media.close().await;
                return Err(e);
            }
        };

        let mut active = ActiveCall::new(session.clone(), PeerRole::Caller);
        active.listeners = listeners;
        active.timeout_task = Some(inner.spawn_ring_timeout(session_id.clone()));
        *slot = Some(active);
        inner.set_state(&session_id, CallState::Ringing);
        drop(slot);

        info!(
            session_id = %session_id,
            receiver = %session.receiver_id,
            call_type = ?session.call_type,
            "outgoing call ringing"
        );
        inner
            .remind(ReminderRecord::incoming_call(&session, inner.clock.now()))
            .await;
        Ok(session)
    }

    /// Answers a ringing call on the receiver side: ringing → accepted.
    pub async fn accept_call(&self, session_id: &str) -> CallResult<CallSession> {
        let inner = &self.inner;
        let mut slot = inner.call.lock().await;
        if slot.is_some() {
            return Err(CallError::Busy);
        }
        inner.ending.store(false, Ordering::SeqCst);

        let mut session = inner
            .store
            .get_session(session_id)
            .await
            .map_err(|e| lookup_error(session_id, e))?
            .ok_or_else(|| CallError::NotFound {
                call_id: session_id.to_string(),
            })?;

        if session.status != CallStatus::Ringing {
            return Err(CallError::invalid_state(format!(
                "call {session_id} is {}",
                session.status
            )));
        }

        let now = inner.clock.now();
        if session.is_stale(now, inner.config.stale_after()) {
            let update = SessionUpdate::terminal(
                CallStatus::Ended,
                now,
                Some(0),
                EndReason::StaleCleanup,
            );
            if let Err(e) = inner
                .store
                .transition_session(session_id, &[CallStatus::Ringing], &update)
                .await
            {
                warn!(session_id, "failed to mark stale call ended: {e}");
            }
            return Err(CallError::Expired {
                call_id: session_id.to_string(),
            });
        }

        let offer = session
            .offer
            .clone()
            .ok_or_else(|| CallError::invalid_state(format!("call {session_id} has no offer")))?;

        inner
            .media
            .acquire_local_media(session.call_type.constraints())
            .await
            .inspect_err(|e| warn!(kind = %e.kind, "local media unavailable: {}", e.detail))?;

        let (answer, events) = match inner.prepare_incoming(&offer).await {
            Ok(prepared) => prepared,
            Err(e) => {
                inner.media.close().await;
                return Err(e);
            }
        };

        let update = SessionUpdate {
            status: Some(CallStatus::Accepted),
            started_at: Some(now),
            answer: Some(answer),
            ..Default::default()
        };
        match inner
            .store
            .transition_session(session_id, &[CallStatus::Ringing], &update)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                inner.media.close().await;
                return Err(CallError::invalid_state(format!(
                    "call {session_id} is no longer ringing"
                )));
            }
            Err(e) => {
                inner.media.close().await;
                return Err(lookup_error(session_id, e));
            }
        }
        update.apply(&mut session);

        let listeners = match inner
            .spawn_listeners(session_id, PeerRole::Receiver, events)
            .await
        {
            Ok(listeners) => listeners,
            Err(e) => {
                inner.abandon(session_id).await;
                inner.media.close().await;
                return Err(e);
            }
        };

        let mut active = ActiveCall::new(session.clone(), PeerRole::Receiver);
        active.answer_applied = true;
        active.listeners = listeners;
        *slot = Some(active);
        inner.set_state(session_id, CallState::Accepted);
        drop(slot);

        info!(session_id, caller = %session.caller_id, "incoming call accepted");
        Ok(session)
    }

    /// Declines a ringing call. Returns false when the call had already left
    /// the ringing status (answered, cancelled, timed out).
    pub async fn reject_call(&self, session_id: &str) -> CallResult<bool> {
        let inner = &self.inner;
        let update = SessionUpdate::terminal(
            CallStatus::Rejected,
            inner.clock.now(),
            None,
            EndReason::Rejected,
        );
        let applied = inner
            .store
            .transition_session(session_id, &[CallStatus::Ringing], &update)
            .await
            .map_err(|e| lookup_error(session_id, e))?;

        if applied {
            info!(session_id, "incoming call rejected");
            if inner.call.lock().await.is_none() {
                inner.set_state(session_id, CallState::Rejected);
            }
        } else {
            debug!(session_id, "reject ignored, call no longer ringing");
        }
        Ok(applied)
    }

    /// Hangs up. Returns the outcome the first time and `None` afterwards.
    pub async fn end_call(&self) -> CallResult<Option<CallOutcome>> {
        let reason = if self.state() == CallState::Ringing {
            EndReason::Cancelled
        } else {
            EndReason::Hangup
        };
        self.inner.terminate(reason).await
    }

    /// Flips the local audio tracks; returns whether audio is now enabled.
    pub async fn toggle_audio(&self) -> CallResult<bool> {
        self.toggle_track(TrackKind::Audio).await
    }

    /// Flips the local video tracks; returns whether video is now enabled.
    pub async fn toggle_video(&self) -> CallResult<bool> {
        self.toggle_track(TrackKind::Video).await
    }

    async fn toggle_track(&self, kind: TrackKind) -> CallResult<bool> {
        let tracks: Vec<_> = self
            .inner
            .media
            .local_tracks()
            .await
            .into_iter()
            .filter(|t| t.kind == kind)
            .collect();
        let Some(first) = tracks.first() else {
            return Err(CallError::invalid_state(format!("no local {kind:?} track")));
        };

        let enable = !first.enabled;
        for track in &tracks {
            self.inner.media.set_track_enabled(&track.id, enable).await;
        }
        debug!(?kind, enable, "local track toggled");
        Ok(enable)
    }
}

fn lookup_error(session_id: &str, e: StoreError) -> CallError {
    match e {
        StoreError::NotFound(_) => CallError::NotFound {
            call_id: session_id.to_string(),
        },
        other => CallError::Store(other),
    }
}

impl Inner {
    fn set_state(&self, session_id: &str, state: CallState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(session_id, "call state {previous} -> {state}");
            let _ = self.events_tx.send(CallEvent::StateChanged {
                session_id: session_id.to_string(),
                state,
            });
        }
    }

    fn emit(&self, event: CallEvent) {
        let _ = self.events_tx.send(event);
    }

    async fn remind(&self, record: ReminderRecord) {
        if let Err(e) = self.notifier.notify(record).await {
            warn!("failed to hand reminder to notifier: {e}");
        }
    }

    async fn prepare_outgoing(
        &self,
        request: &OutgoingCall,
    ) -> CallResult<(CallSession, mpsc::UnboundedReceiver<PeerEvent>)> {
        let events = self
            .media
            .create_peer_connection(&self.config.ice_servers)
            .await?;
        let offer = self.media.create_offer().await?;
        self.media.set_local_description(&offer).await?;

        let now = self.clock.now();
        let session = CallSession {
            id: random_id(),
            caller_id: request.caller.id.clone(),
            caller_name: request.caller.name.clone(),
            caller_photo_url: request.caller.photo_url.clone(),
            receiver_id: request.receiver.id.clone(),
            receiver_name: request.receiver.name.clone(),
            receiver_photo_url: request.receiver.photo_url.clone(),
            call_type: request.call_type,
            status: CallStatus::Ringing,
            created_at: now,
            started_at: None,
            ended_at: None,
            duration: None,
            offer: Some(offer),
            answer: None,
            chat_room_id: request.chat_room_id.clone(),
            end_reason: None,
            expire_at: add_window(now, self.config.retention()),
        };
        self.store.create_session(&session).await?;
        dump_session("CREATED", &session);
        Ok((session, events))
    }

    async fn prepare_incoming(
        &self,
        offer: &SessionDescription,
    ) -> CallResult<(SessionDescription, mpsc::UnboundedReceiver<PeerEvent>)> {
        let events = self
            .media
            .create_peer_connection(&self.config.ice_servers)
            .await?;
        self.media.set_remote_description(offer).await?;
        let answer = self.media.create_answer().await?;
        self.media.set_local_description(&answer).await?;
        Ok((answer, events))
    }

    /// Best-effort terminal write for a call that failed during setup.
    async fn abandon(&self, session_id: &str) {
        let update = SessionUpdate::terminal(
            CallStatus::Ended,
            self.clock.now(),
            Some(0),
            EndReason::ConnectionFailed,
        );
        if let Err(e) = self.store.transition_session(session_id, &LIVE, &update).await {
            warn!(session_id, "failed to mark abandoned call ended: {e}");
        }
    }

    async fn spawn_listeners(
        self: &Arc<Self>,
        session_id: &str,
        role: PeerRole,
        events: mpsc::UnboundedReceiver<PeerEvent>,
    ) -> CallResult<Vec<JoinHandle<()>>> {
        let session_sub = self.store.watch_session(session_id).await?;
        let candidate_sub = self
            .store
            .watch_candidates(session_id, role.opposite())
            .await?;
        let weak = Arc::downgrade(self);

        Ok(vec![
            tokio::spawn(session_loop(weak.clone(), session_id.to_string(), session_sub)),
            tokio::spawn(remote_candidate_loop(
                weak.clone(),
                session_id.to_string(),
                candidate_sub,
            )),
            tokio::spawn(peer_event_loop(weak, session_id.to_string(), role, events)),
        ])
    }

    fn spawn_ring_timeout(self: &Arc<Self>, session_id: String) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let timeout = self.config.ring_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_ring_timeout(&session_id).await;
            }
        })
    }

    /// Runs termination on its own task so a listener can trigger it
    /// without being aborted halfway through.
    fn spawn_terminate(self: &Arc<Self>, reason: EndReason) {
        let inner = self.clone();
        tokio::spawn(async move {
            if let Err(e) = inner.terminate(reason).await {
                warn!("call teardown finished with store error: {e}");
            }
        });
    }

    fn spawn_remote_terminal(self: &Arc<Self>, session_id: String, doc: Option<CallSession>) {
        let inner = self.clone();
        tokio::spawn(async move { inner.on_remote_terminal(&session_id, doc).await });
    }

    async fn terminate(self: &Arc<Self>, reason: EndReason) -> CallResult<Option<CallOutcome>> {
        if self.ending.swap(true, Ordering::SeqCst) {
            debug!(?reason, "call already ending");
            return Ok(None);
        }
        self.finish(reason).await
    }

    /// Local teardown with a terminal write. Caller must have set `ending`.
    ///
    /// The write is conditioned on the status read just before it, so an
    /// accept or a remote terminal write landing in between is never
    /// overwritten. A timeout that finds the call accepted backs off and the
    /// call stays up; a cancel that finds it accepted becomes a hangup.
    async fn finish(self: &Arc<Self>, reason: EndReason) -> CallResult<Option<CallOutcome>> {
        let (session_id, local_start) = match self.call.lock().await.as_ref() {
            Some(active) => (active.id().to_string(), active.session.started_at),
            None => {
                self.ending.store(false, Ordering::SeqCst);
                return Ok(None);
            }
        };

        let now = self.clock.now();
        let settled = self.settle_terminal(&session_id, reason, now).await;

        let (outcome, result) = match settled {
            Settled::Answered(doc) => {
                self.ending.store(false, Ordering::SeqCst);
                info!(session_id = %session_id, "call was answered before the ring timeout, keeping it");
                self.on_session_update(doc).await;
                return Ok(None);
            }
            Settled::Written(outcome) => (outcome, Ok(Some(outcome))),
            Settled::Lost(doc) => {
                // someone else wrote a terminal status first; report theirs
                let outcome = outcome_from_doc(&doc, reason);
                debug!(session_id = %session_id, ?outcome, "terminal status already written by peer");
                (outcome, Ok(Some(outcome)))
            }
            Settled::Gone => {
                let outcome = CallOutcome {
                    status: CallStatus::Ended,
                    reason,
                    duration: Some(local_start.map_or(0, |start| whole_seconds_between(start, now))),
                };
                debug!(session_id = %session_id, "session document already gone");
                (outcome, Ok(Some(outcome)))
            }
            Settled::Failed(e) => {
                warn!(session_id = %session_id, "failed to write terminal status: {e}");
                let outcome = CallOutcome {
                    status: CallStatus::Ended,
                    reason,
                    duration: Some(local_start.map_or(0, |start| whole_seconds_between(start, now))),
                };
                (outcome, Err(CallError::Store(e)))
            }
        };

        if let Some(mut active) = self.call.lock().await.take() {
            active.stop_tasks();
        }
        self.release(&session_id, outcome).await;
        result
    }

    /// Reads the stored status and writes `ended` against exactly that
    /// status, retrying when it moved in between. Status only moves forward,
    /// so this loops at most once per transition.
    async fn settle_terminal(
        &self,
        session_id: &str,
        reason: EndReason,
        now: DateTime<Utc>,
    ) -> Settled {
        let mut reason = reason;
        loop {
            let doc = match self.store.get_session(session_id).await {
                Ok(Some(doc)) => doc,
                Ok(None) => return Settled::Gone,
                Err(e) => return Settled::Failed(e),
            };
            if doc.status.is_terminal() {
                return Settled::Lost(doc);
            }
            if doc.status == CallStatus::Accepted {
                match reason {
                    EndReason::Timeout => return Settled::Answered(doc),
                    EndReason::Cancelled => reason = EndReason::Hangup,
                    _ => {}
                }
            }

            let duration = doc
                .started_at
                .map_or(0, |start| whole_seconds_between(start, now));
            let update = SessionUpdate::terminal(CallStatus::Ended, now, Some(duration), reason);
            match self
                .store
                .transition_session(session_id, &[doc.status], &update)
                .await
            {
                Ok(true) => {
                    return Settled::Written(CallOutcome {
                        status: CallStatus::Ended,
                        reason,
                        duration: Some(duration),
                    })
                }
                Ok(false) => debug!(session_id, "status moved during terminal write, re-reading"),
                Err(e) => return Settled::Failed(e),
            }
        }
    }

    async fn on_remote_terminal(self: &Arc<Self>, session_id: &str, doc: Option<CallSession>) {
        let active = {
            let mut slot = self.call.lock().await;
            if slot.as_ref().map(|a| a.id()) != Some(session_id) {
                return;
            }
            if self.ending.swap(true, Ordering::SeqCst) {
                return;
            }
            slot.take()
        };
        let Some(mut active) = active else {
            return;
        };
        active.stop_tasks();

        let outcome = match &doc {
            Some(doc) => outcome_from_doc(doc, EndReason::RemoteHangup),
            None => CallOutcome {
                status: CallStatus::Ended,
                reason: EndReason::RemoteHangup,
                duration: active
                    .session
                    .started_at
                    .map(|start| whole_seconds_between(start, self.clock.now())),
            },
        };
        info!(session_id, ?outcome, "call ended by remote side");
        self.release(session_id, outcome).await;
    }

    async fn release(&self, session_id: &str, outcome: CallOutcome) {
        self.media.close().await;
        let state = match outcome.status {
            CallStatus::Rejected => CallState::Rejected,
            _ => CallState::Ended,
        };
        self.set_state(session_id, state);
        self.emit(CallEvent::Ended {
            session_id: session_id.to_string(),
            outcome,
        });
        info!(
            session_id,
            status = %outcome.status,
            reason = ?outcome.reason,
            duration = ?outcome.duration,
            "call finished"
        );
    }

    async fn on_session_update(self: &Arc<Self>, session: CallSession) {
        let mut slot = self.call.lock().await;
        let Some(active) = slot.as_mut() else {
            return;
        };
        if active.id() != session.id || self.ending.load(Ordering::SeqCst) {
            return;
        }
        active.session = session.clone();

        match session.status {
            CallStatus::Ringing => {}
            CallStatus::Accepted => {
                if active.role != PeerRole::Caller || active.answer_applied {
                    return;
                }
                if let Some(handle) = active.timeout_task.take() {
                    handle.abort();
                }
                self.set_state(&session.id, CallState::Accepted);

                let Some(answer) = session.answer.as_ref() else {
                    warn!(session_id = %session.id, "accepted without an answer");
                    drop(slot);
                    self.spawn_terminate(EndReason::ConnectionFailed);
                    return;
                };
                active.answer_applied = true;

                match self.media.set_remote_description(answer).await {
                    Ok(()) => {
                        self.set_state(&session.id, CallState::Connected);
                        info!(session_id = %session.id, "remote answer applied, call connected");
                    }
                    Err(e) => {
                        warn!(session_id = %session.id, "failed to apply remote answer: {e}");
                        drop(slot);
                        self.spawn_terminate(EndReason::ConnectionFailed);
                    }
                }
            }
            CallStatus::Rejected | CallStatus::Ended => {
                drop(slot);
                dump_session("REMOTE-TERMINAL", &session);
                self.spawn_remote_terminal(session.id.clone(), Some(session));
            }
        }
    }

    async fn on_ring_timeout(self: &Arc<Self>, session_id: &str) {
        let session = {
            let mut slot = self.call.lock().await;
            let Some(active) = slot.as_mut() else {
                return;
            };
            if active.id() != session_id || *self.state_tx.borrow() != CallState::Ringing {
                debug!(session_id, "ring timeout fired after call moved on");
                return;
            }
            // this task is the timer; dropping the handle keeps finish() from aborting it
            active.timeout_task.take();
            if self.ending.swap(true, Ordering::SeqCst) {
                return;
            }
            active.session.clone()
        };

        info!(
            session_id,
            "call not answered within {}s",
            self.config.ring_timeout_secs
        );
        match self.finish(EndReason::Timeout).await {
            Ok(Some(outcome)) if outcome.reason == EndReason::Timeout => {
                self.remind(ReminderRecord::missed_call(&session, self.clock.now()))
                    .await;
            }
            Ok(_) => {}
            Err(e) => warn!(session_id, "timeout teardown hit a store error: {e}"),
        }
    }

    async fn on_peer_state(self: &Arc<Self>, session_id: &str, state: PeerState) {
        match state {
            PeerState::Connected => {
                let mut slot = self.call.lock().await;
                let Some(active) = slot.as_mut().filter(|a| a.id() == session_id) else {
                    return;
                };
                if let Some(handle) = active.grace_task.take() {
                    handle.abort();
                    info!(session_id, "connection recovered");
                    self.emit(CallEvent::ConnectionRecovered {
                        session_id: session_id.to_string(),
                    });
                }
                if active.role == PeerRole::Receiver
                    && *self.state_tx.borrow() == CallState::Accepted
                {
                    self.set_state(session_id, CallState::Connected);
                }
            }
            PeerState::Disconnected => {
                let mut slot = self.call.lock().await;
                let Some(active) = slot.as_mut().filter(|a| a.id() == session_id) else {
                    return;
                };
                if active.grace_task.is_some() {
                    debug!(session_id, "grace period already running");
                    return;
                }
                warn!(
                    session_id,
                    "peer disconnected, waiting {}s before giving up",
                    self.config.disconnect_grace_secs
                );
                self.emit(CallEvent::ConnectionProblem {
                    session_id: session_id.to_string(),
                });
                active.grace_task = Some(self.spawn_grace(session_id.to_string()));
            }
            PeerState::Failed | PeerState::Closed => {
                if self.ending.load(Ordering::SeqCst) {
                    return;
                }
                warn!(session_id, ?state, "peer connection lost");
                self.spawn_terminate(EndReason::ConnectionFailed);
            }
            PeerState::New | PeerState::Connecting => {}
        }
    }

    fn spawn_grace(self: &Arc<Self>, session_id: String) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let grace = self.config.disconnect_grace();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.media.connection_state().await == PeerState::Connected {
                debug!(session_id = %session_id, "connection came back during grace period");
                return;
            }
            {
                let mut slot = inner.call.lock().await;
                match slot.as_mut().filter(|a| a.id() == session_id) {
                    Some(active) => {
                        active.grace_task.take();
                    }
                    None => return,
                }
                if inner.ending.swap(true, Ordering::SeqCst) {
                    return;
                }
            }
            warn!(session_id = %session_id, "connection did not recover");
            if let Err(e) = inner.finish(EndReason::ConnectionFailed).await {
                warn!(session_id = %session_id, "teardown after grace period hit a store error: {e}");
            }
        })
    }

    async fn publish_local_candidate(&self, session_id: &str, record: IceCandidateRecord) {
        if let Err(e) = self.store.add_candidate(session_id, &record).await {
            warn!(session_id, "failed to publish local candidate: {e}");
        }
    }
}

fn outcome_from_doc(doc: &CallSession, fallback: EndReason) -> CallOutcome {
    CallOutcome {
        status: if doc.status.is_terminal() {
            doc.status
        } else {
            CallStatus::Ended
        },
        reason: doc.end_reason.unwrap_or(fallback),
        duration: doc.duration,
    }
}

async fn session_loop(weak: Weak<Inner>, session_id: String, mut sub: Subscription<SessionChange>) {
    while let Some(change) = sub.next().await {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        match change {
            SessionChange::Updated(session) => inner.on_session_update(session).await,
            SessionChange::Deleted => {
                debug!(session_id = %session_id, "session document deleted");
                inner.spawn_remote_terminal(session_id.clone(), None);
                break;
            }
        }
    }
}

async fn remote_candidate_loop(
    weak: Weak<Inner>,
    session_id: String,
    mut sub: Subscription<IceCandidateRecord>,
) {
    while let Some(record) = sub.next().await {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        crate::logger::dump_candidate("REMOTE", &record.candidate);
        if let Err(e) = inner.media.add_ice_candidate(&record.candidate).await {
            warn!(session_id = %session_id, "failed to add remote candidate: {e}");
        }
    }
}

async fn peer_event_loop(
    weak: Weak<Inner>,
    session_id: String,
    role: PeerRole,
    mut events: mpsc::UnboundedReceiver<PeerEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                let record = IceCandidateRecord {
                    candidate,
                    role,
                    created_at: inner.clock.now(),
                };
                inner.publish_local_candidate(&session_id, record).await;
            }
            PeerEvent::GatheringComplete => debug!(session_id = %session_id, "local gathering complete"),
            PeerEvent::StateChanged(state) => inner.on_peer_state(&session_id, state).await,
            PeerEvent::RemoteTrack(kind) => inner.emit(CallEvent::RemoteTrack {
                session_id: session_id.clone(),
                kind,
            }),
        }
    }
}
