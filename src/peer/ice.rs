use crate::peer::types::{IceCandidate, ServerConfig};
use crate::utils::add_ice_url_scheme;
use once_cell::sync::Lazy;
use tracing::{debug, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;

static DEFAULT_SERVERS: Lazy<Vec<ServerConfig>> = Lazy::new(|| {
    vec![
        ServerConfig {
            id: "default-stun".into(),
            r#type: "stun".into(),
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: "stun".into(),
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
});

/// Public STUN pair used when nothing else is configured
pub fn default_servers() -> Vec<ServerConfig> {
    DEFAULT_SERVERS.clone()
}

/// Проверка списка серверов: пустой URL и TURN без учётных данных недопустимы
pub fn validate_servers(servers: &[ServerConfig]) -> Result<(), String> {
    for server in servers {
        if server.url.trim().is_empty() {
            return Err(format!("ICE server '{}' has an empty URL", server.id));
        }
        if server.r#type != "stun" && server.r#type != "turn" {
            return Err(format!(
                "ICE server '{}' has unknown type '{}'",
                server.id, server.r#type
            ));
        }
        if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none()) {
            return Err(format!(
                "TURN server '{}' requires username and credential",
                server.id
            ));
        }
    }
    Ok(())
}

pub fn to_rtc_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

/// Создает конфигурацию для peer connection
pub fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    let servers = if servers.is_empty() {
        default_servers()
    } else {
        servers.to_vec()
    };

    RTCConfiguration {
        ice_servers: to_rtc_ice_servers(&servers),
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
        }
    }
}

impl From<&IceCandidate> for RTCIceCandidateInit {
    fn from(c: &IceCandidate) -> Self {
        RTCIceCandidateInit {
            candidate: c.candidate.clone(),
            sdp_mid: c.sdp_mid.clone(),
            sdp_mline_index: c.sdp_mline_index,
            username_fragment: None,
        }
    }
}

/// Counts of gathered candidates by type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

pub fn analyze_candidates(candidates: &[IceCandidate]) -> CandidateSummary {
    let mut summary = CandidateSummary::default();
    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            summary.host += 1;
        } else if candidate.candidate.contains("typ srflx") {
            summary.srflx += 1;
        } else if candidate.candidate.contains("typ relay") {
            summary.relay += 1;
        }
    }

    debug!(
        host = summary.host,
        srflx = summary.srflx,
        relay = summary.relay,
        "candidate analysis"
    );
    if summary.relay == 0 && !candidates.is_empty() {
        warn!("no TURN relay candidates gathered; connections through strict NAT may fail");
    }
    summary
}

/// Кандидаты, полученные до установки remote description
#[derive(Debug, Default)]
pub struct PendingCandidates {
    queue: Vec<IceCandidate>,
}

impl PendingCandidates {
    pub fn push(&mut self, candidate: IceCandidate) {
        self.queue.push(candidate);
    }

    /// Takes everything queued so far, in arrival order.
    pub fn drain(&mut self) -> Vec<IceCandidate> {
        std::mem::take(&mut self.queue)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(line: &str) -> IceCandidate {
        IceCandidate {
            candidate: line.into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        }
    }

    #[test]
    fn empty_server_list_falls_back_to_defaults() {
        let config = rtc_config(&[]);
        assert_eq!(config.ice_servers.len(), 2);
        assert_eq!(config.ice_servers[0].urls[0], "stun:stun.l.google.com:19302");
    }

    #[test]
    fn turn_credentials_are_carried_over() {
        let servers = vec![ServerConfig {
            id: "relay".into(),
            r#type: "turn".into(),
            url: "relay.example.org:3478".into(),
            username: Some("u".into()),
            credential: Some("p".into()),
        }];
        assert!(validate_servers(&servers).is_ok());
        let ice = to_rtc_ice_servers(&servers);
        assert_eq!(ice[0].urls[0], "turn:relay.example.org:3478");
        assert_eq!(ice[0].username, "u");
        assert_eq!(ice[0].credential, "p");
    }

    #[test]
    fn rejects_unknown_server_type() {
        let mut servers = default_servers();
        servers[0].r#type = "quic".into();
        assert!(validate_servers(&servers).is_err());
    }

    #[test]
    fn summary_counts_by_type() {
        let summary = analyze_candidates(&[
            cand("candidate:1 1 udp 2122260223 192.168.1.4 54000 typ host"),
            cand("candidate:2 1 udp 1686052607 203.0.113.9 54000 typ srflx raddr 192.168.1.4 rport 54000"),
            cand("candidate:3 1 udp 41885439 198.51.100.2 3478 typ relay raddr 203.0.113.9 rport 54000"),
            cand("candidate:4 1 tcp 1518280447 192.168.1.4 9 typ host tcptype active"),
        ]);
        assert_eq!(summary, CandidateSummary { host: 2, srflx: 1, relay: 1 });
    }

    #[test]
    fn pending_queue_drains_in_order() {
        let mut pending = PendingCandidates::default();
        pending.push(cand("a"));
        pending.push(cand("b"));
        let drained = pending.drain();
        assert_eq!(drained[0].candidate, "a");
        assert_eq!(drained[1].candidate, "b");
        assert!(pending.is_empty());
    }
}
