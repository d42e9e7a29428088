//! In-process signaling store.
//!
//! Keeps session documents and their candidate lists in a map and fans every
//! change out to live subscriptions. Two controllers sharing one instance
//! behave like two devices sharing one remote database.

use super::{SessionChange, SessionQuery, SignalingStore, Subscription};
use crate::error::StoreError;
use crate::session::{CallSession, CallStatus, IceCandidateRecord, PeerRole, SessionUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace};

struct Entry {
    session: CallSession,
    candidates: Vec<IceCandidateRecord>,
    watchers: Vec<mpsc::UnboundedSender<SessionChange>>,
    candidate_watchers: Vec<(PeerRole, mpsc::UnboundedSender<IceCandidateRecord>)>,
}

impl Entry {
    fn new(session: CallSession) -> Self {
        Self {
            session,
            candidates: Vec::new(),
            watchers: Vec::new(),
            candidate_watchers: Vec::new(),
        }
    }

    fn publish(&mut self) {
        let change = SessionChange::Updated(self.session.clone());
        self.watchers.retain(|tx| tx.send(change.clone()).is_ok());
    }

    fn publish_deleted(&mut self) {
        for tx in self.watchers.drain(..) {
            let _ = tx.send(SessionChange::Deleted);
        }
        self.candidate_watchers.clear();
    }
}

#[derive(Default)]
pub struct InMemorySignalingStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemorySignalingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored candidates for a session, by publishing role.
    pub async fn candidate_count(&self, session_id: &str, role: PeerRole) -> usize {
        let entries = self.entries.lock().await;
        entries
            .get(session_id)
            .map(|e| e.candidates.iter().filter(|c| c.role == role).count())
            .unwrap_or(0)
    }

    /// Live session and candidate subscriptions held for a session.
    pub async fn watcher_count(&self, session_id: &str) -> usize {
        let entries = self.entries.lock().await;
        entries
            .get(session_id)
            .map(|e| e.watchers.len() + e.candidate_watchers.len())
            .unwrap_or(0)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl SignalingStore for InMemorySignalingStore {
    async fn create_session(&self, session: &CallSession) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(&session.id) {
            return Err(StoreError::AlreadyExists(session.id.clone()));
        }
        debug!(session_id = %session.id, "session document created");
        entries.insert(session.id.clone(), Entry::new(session.clone()));
        Ok(())
    }

    async fn get_session(&self, id: &str) -> Result<Option<CallSession>, StoreError> {
        let entries = self.entries.lock().await;
        Ok(entries.get(id).map(|e| e.session.clone()))
    }

    async fn update_session(&self, id: &str, update: &SessionUpdate) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        update.apply(&mut entry.session);
        entry.publish();
        Ok(())
    }

    async fn transition_session(
        &self,
        id: &str,
        expected: &[CallStatus],
        update: &SessionUpdate,
    ) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let current = entry.session.status;
        if !expected.contains(&current) {
            debug!(session_id = id, %current, "conditional write skipped");
            return Ok(false);
        }
        if let Some(next) = update.status {
            if !current.can_transition_to(next) {
                debug!(session_id = id, %current, %next, "illegal transition refused");
                return Ok(false);
            }
        }

        update.apply(&mut entry.session);
        entry.publish();
        Ok(true)
    }

    async fn watch_session(&self, id: &str) -> Result<Subscription<SessionChange>, StoreError> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(SessionChange::Updated(entry.session.clone()));
        entry.watchers.push(tx);
        Ok(Subscription::new(rx))
    }

    async fn add_candidate(
        &self,
        session_id: &str,
        record: &IceCandidateRecord,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(session_id)
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))?;

        trace!(session_id, role = ?record.role, "candidate stored");
        entry.candidates.push(record.clone());
        entry
            .candidate_watchers
            .retain(|(role, tx)| *role != record.role || tx.send(record.clone()).is_ok());
        Ok(())
    }

    async fn watch_candidates(
        &self,
        session_id: &str,
        role: PeerRole,
    ) -> Result<Subscription<IceCandidateRecord>, StoreError> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(session_id)
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        for existing in entry.candidates.iter().filter(|c| c.role == role) {
            let _ = tx.send(existing.clone());
        }
        entry.candidate_watchers.push((role, tx));
        Ok(Subscription::new(rx))
    }

    async fn query_sessions(&self, query: &SessionQuery) -> Result<Vec<CallSession>, StoreError> {
        let entries = self.entries.lock().await;
        Ok(entries
            .values()
            .filter(|e| query.matches(&e.session))
            .map(|e| e.session.clone())
            .collect())
    }

    async fn delete_session(&self, id: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        if let Some(mut entry) = entries.remove(id) {
            debug!(session_id = id, "session document deleted");
            entry.publish_deleted();
        }
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut entries = self.entries.lock().await;
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.session.expire_at <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            if let Some(mut entry) = entries.remove(id) {
                entry.publish_deleted();
            }
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "expired sessions purged");
        }
        Ok(expired.len())
    }
}
