use crate::config::LoggingConfig;
use crate::peer::types::IceCandidate;
use crate::session::CallSession;
use tracing::{debug, trace};
use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over the configured filter. Returns false when
/// logging is disabled or a subscriber was already installed.
pub fn init(config: &LoggingConfig) -> bool {
    if !config.enabled {
        return false;
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new(crate::config::DEFAULT_LOG_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

/// Печать ICE-candidate при появлении (Trickle-ICE)
pub fn dump_candidate(label: &str, cand: &IceCandidate) {
    trace!(
        "Trickle {label}: candidate={} sdp_mid={:?} sdp_mline_index={:?}",
        cand.candidate,
        cand.sdp_mid,
        cand.sdp_mline_index
    );
}

/// One-line summary of a session document
pub fn dump_session(moment: &str, session: &CallSession) {
    debug!(
        "SESSION {moment}: id={} {}→{} type={:?} status={} started={:?} ended={:?} duration={:?} reason={:?}",
        session.id,
        session.caller_id,
        session.receiver_id,
        session.call_type,
        session.status,
        session.started_at,
        session.ended_at,
        session.duration,
        session.end_reason
    );
}
