//! Document-store signaling channel.
//!
//! The controller never talks to a concrete database. It consumes the
//! operations below, which map one-to-one onto what a document store with
//! change listeners offers: create, patch, read once, listen to a document,
//! listen to a sub-collection, delete and expire.
//!
//! Status changes that end a call go through [`SignalingStore::transition_session`],
//! a conditional write. When both peers race to write a terminal status the
//! first one wins and the second sees `Ok(false)`.

pub mod memory;

use crate::error::StoreError;
use crate::session::{CallSession, CallStatus, IceCandidateRecord, PeerRole, SessionUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

pub use memory::InMemorySignalingStore;

/// A change observed on a watched session document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChange {
    Updated(CallSession),
    Deleted,
}

/// Filter for [`SignalingStore::query_sessions`]; `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionQuery {
    pub caller_id: Option<String>,
    pub receiver_id: Option<String>,
    pub status: Option<CallStatus>,
}

impl SessionQuery {
    pub fn incoming(receiver_id: impl Into<String>) -> Self {
        Self {
            receiver_id: Some(receiver_id.into()),
            status: Some(CallStatus::Ringing),
            ..Default::default()
        }
    }

    pub fn with_status(status: CallStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn matches(&self, session: &CallSession) -> bool {
        self.caller_id.as_deref().map_or(true, |id| id == session.caller_id)
            && self.receiver_id.as_deref().map_or(true, |id| id == session.receiver_id)
            && self.status.map_or(true, |s| s == session.status)
    }
}

/// Cancellable stream of store events. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    pub fn new(rx: mpsc::UnboundedReceiver<T>) -> Self {
        Self { rx }
    }

    /// Next event, or `None` once the store side is gone or the
    /// subscription was cancelled.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Non-blocking variant used to drain what is already buffered.
    pub fn try_next(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn cancel(mut self) {
        self.rx.close();
    }
}

#[async_trait]
pub trait SignalingStore: Send + Sync {
    async fn create_session(&self, session: &CallSession) -> Result<(), StoreError>;

    async fn get_session(&self, id: &str) -> Result<Option<CallSession>, StoreError>;

    /// Unconditional patch of the given fields.
    async fn update_session(&self, id: &str, update: &SessionUpdate) -> Result<(), StoreError>;

    /// Applies `update` only while the stored status is one of `expected`
    /// and the new status (if any) is a legal forward transition.
    /// Returns whether the write happened.
    async fn transition_session(
        &self,
        id: &str,
        expected: &[CallStatus],
        update: &SessionUpdate,
    ) -> Result<bool, StoreError>;

    /// Current document first, then every subsequent change.
    async fn watch_session(&self, id: &str) -> Result<Subscription<SessionChange>, StoreError>;

    async fn add_candidate(
        &self,
        session_id: &str,
        record: &IceCandidateRecord,
    ) -> Result<(), StoreError>;

    /// Candidates published by `role`: the ones already stored, then new arrivals.
    async fn watch_candidates(
        &self,
        session_id: &str,
        role: PeerRole,
    ) -> Result<Subscription<IceCandidateRecord>, StoreError>;

    async fn query_sessions(&self, query: &SessionQuery) -> Result<Vec<CallSession>, StoreError>;

    /// Removes the session and its candidates.
    async fn delete_session(&self, id: &str) -> Result<(), StoreError>;

    /// Deletes every session whose `expireAt` is at or before `now`.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}
