//! Observer-side view of call sessions: incoming listings, stale cleanup,
//! retention purge and history.
//!
//! Cleanup is best effort. Several observers may clean the same session at
//! once; the conditional write makes every attempt after the first a no-op.

use crate::call::clock::{Clock, SystemClock};
use crate::config::CallConfig;
use crate::error::CallResult;
use crate::notify::{LogNotifier, Notifier, ReminderRecord};
use crate::session::{CallSession, CallStatus, EndReason, SessionUpdate};
use crate::signaling::{SessionQuery, SignalingStore};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct CallRegistry {
    store: Arc<dyn SignalingStore>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    config: CallConfig,
}

impl CallRegistry {
    pub fn new(store: Arc<dyn SignalingStore>, config: CallConfig) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            notifier: Arc::new(LogNotifier),
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Ringing calls for `receiver_id`, newest first. Stale ones are left
    /// out and marked ended on the way.
    pub async fn incoming_calls(&self, receiver_id: &str) -> CallResult<Vec<CallSession>> {
        let now = self.clock.now();
        let ringing = self
            .store
            .query_sessions(&SessionQuery::incoming(receiver_id))
            .await?;

        let (stale, mut fresh): (Vec<_>, Vec<_>) = ringing
            .into_iter()
            .partition(|s| s.is_stale(now, self.config.stale_after()));

        for session in &stale {
            self.expire_stale(session, now).await;
        }

        fresh.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(fresh)
    }

    /// Marks every stale ringing call ended; returns how many this call changed.
    pub async fn sweep_stale(&self) -> CallResult<usize> {
        let now = self.clock.now();
        let ringing = self
            .store
            .query_sessions(&SessionQuery::with_status(CallStatus::Ringing))
            .await?;

        let mut cleaned = 0;
        for session in ringing
            .iter()
            .filter(|s| s.is_stale(now, self.config.stale_after()))
        {
            if self.expire_stale(session, now).await {
                cleaned += 1;
            }
        }
        if cleaned > 0 {
            info!(cleaned, "stale calls swept");
        }
        Ok(cleaned)
    }

    /// Deletes sessions past their retention window.
    pub async fn purge_expired(&self) -> CallResult<usize> {
        let purged = self.store.purge_expired(self.clock.now()).await?;
        Ok(purged)
    }

    /// Finished calls the user took part in, newest first.
    pub async fn call_history(&self, user_id: &str) -> CallResult<Vec<CallSession>> {
        let as_caller = SessionQuery {
            caller_id: Some(user_id.to_string()),
            ..Default::default()
        };
        let as_receiver = SessionQuery {
            receiver_id: Some(user_id.to_string()),
            ..Default::default()
        };

        let mut by_id: HashMap<String, CallSession> = HashMap::new();
        for query in [as_caller, as_receiver] {
            for session in self.store.query_sessions(&query).await? {
                if session.status.is_terminal() {
                    by_id.insert(session.id.clone(), session);
                }
            }
        }

        let mut history: Vec<CallSession> = by_id.into_values().collect();
        history.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(history)
    }

    async fn expire_stale(&self, session: &CallSession, now: DateTime<Utc>) -> bool {
        let update = SessionUpdate::terminal(
            CallStatus::Ended,
            now,
            Some(0),
            EndReason::StaleCleanup,
        );
        match self
            .store
            .transition_session(&session.id, &[CallStatus::Ringing], &update)
            .await
        {
            Ok(true) => {
                info!(session_id = %session.id, "stale ringing call marked ended");
                if let Err(e) = self
                    .notifier
                    .notify(ReminderRecord::missed_call(session, now))
                    .await
                {
                    warn!(session_id = %session.id, "failed to hand missed-call reminder: {e}");
                }
                true
            }
            Ok(false) => {
                debug!(session_id = %session.id, "stale call already cleaned up");
                false
            }
            Err(e) => {
                warn!(session_id = %session.id, "failed to mark stale call ended: {e}");
                false
            }
        }
    }
}
