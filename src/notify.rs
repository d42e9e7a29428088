//! Boundary to the notification component.
//!
//! The call code only hands over plain records; scheduling and delivery live
//! elsewhere.

use crate::error::NotifyError;
use crate::session::{CallSession, CallType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReminderKind {
    IncomingCall,
    MissedCall,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReminderRecord {
    #[serde(rename = "type")]
    pub kind: ReminderKind,
    pub title: String,
    pub message: String,
    pub target_id: String,
    pub scheduled_at: DateTime<Utc>,
}

impl ReminderRecord {
    pub fn incoming_call(session: &CallSession, at: DateTime<Utc>) -> Self {
        Self {
            kind: ReminderKind::IncomingCall,
            title: format!("Incoming {} call", call_type_label(session.call_type)),
            message: format!("{} is calling you", session.caller_name),
            target_id: session.receiver_id.clone(),
            scheduled_at: at,
        }
    }

    pub fn missed_call(session: &CallSession, at: DateTime<Utc>) -> Self {
        Self {
            kind: ReminderKind::MissedCall,
            title: format!("Missed {} call", call_type_label(session.call_type)),
            message: format!("You missed a call from {}", session.caller_name),
            target_id: session.receiver_id.clone(),
            scheduled_at: at,
        }
    }
}

fn call_type_label(call_type: CallType) -> &'static str {
    match call_type {
        CallType::Voice => "voice",
        CallType::Video => "video",
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, record: ReminderRecord) -> Result<(), NotifyError>;
}

/// Writes records to the log instead of delivering them
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, record: ReminderRecord) -> Result<(), NotifyError> {
        info!(
            kind = ?record.kind,
            target = %record.target_id,
            at = %record.scheduled_at,
            "{}: {}",
            record.title,
            record.message
        );
        Ok(())
    }
}
