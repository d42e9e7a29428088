use crate::error::{CallError, MediaError, MediaErrorKind};
use crate::logger::dump_candidate;
use crate::peer::ice::{analyze_candidates, rtc_config, PendingCandidates};
use crate::peer::types::{
    IceCandidate, LocalTrack, MediaConstraints, PeerEvent, PeerState, SdpType, ServerConfig,
    SessionDescription, TrackKind,
};
use crate::peer::MediaPipeline;
use crate::utils::random_id;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

struct SampleTrack {
    info: LocalTrack,
    track: Arc<TrackLocalStaticSample>,
}

#[derive(Default)]
struct PipelineState {
    peer: Option<Arc<RTCPeerConnection>>,
    tracks: Vec<SampleTrack>,
    pending: PendingCandidates,
}

/// [`MediaPipeline`] backed by the `webrtc` crate.
///
/// Local media is exposed as sample tracks (Opus audio, VP8 video); the
/// application feeds encoded frames through [`WebRtcPipeline::write_sample`].
pub struct WebRtcPipeline {
    api: API,
    state: Mutex<PipelineState>,
}

impl WebRtcPipeline {
    pub fn new() -> Result<Self, CallError> {
        let mut media = MediaEngine::default();
        media
            .register_default_codecs()
            .map_err(|e| CallError::pipeline("register_default_codecs", e))?;

        let registry = register_default_interceptors(Registry::new(), &mut media)
            .map_err(|e| CallError::pipeline("register_default_interceptors", e))?;

        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self {
            api,
            state: Mutex::new(PipelineState::default()),
        })
    }

    /// Pushes one encoded frame to every enabled local track of `kind`.
    /// Frames for disabled (muted) tracks are dropped.
    pub async fn write_sample(&self, kind: TrackKind, data: Bytes, duration: Duration) {
        let targets: Vec<Arc<TrackLocalStaticSample>> = {
            let state = self.state.lock().await;
            state
                .tracks
                .iter()
                .filter(|t| t.info.kind == kind && t.info.enabled)
                .map(|t| t.track.clone())
                .collect()
        };

        for track in targets {
            let sample = Sample {
                data: data.clone(),
                duration,
                ..Default::default()
            };
            if let Err(e) = track.write_sample(&sample).await {
                warn!(?kind, "failed to write sample: {e}");
            }
        }
    }

    async fn peer(&self, operation: &str) -> Result<Arc<RTCPeerConnection>, CallError> {
        self.state
            .lock()
            .await
            .peer
            .clone()
            .ok_or_else(|| CallError::pipeline(operation, "no peer connection"))
    }

    async fn apply_pending_candidates(&self, pc: &RTCPeerConnection) {
        let candidates = self.state.lock().await.pending.drain();
        for candidate in candidates {
            debug!("applying pending candidate: {}", candidate.candidate);
            if let Err(e) = pc.add_ice_candidate(RTCIceCandidateInit::from(&candidate)).await {
                warn!("failed to apply pending candidate: {e}");
            }
        }
    }
}

fn sample_track(kind: TrackKind) -> SampleTrack {
    let mime_type = match kind {
        TrackKind::Audio => MIME_TYPE_OPUS,
        TrackKind::Video => MIME_TYPE_VP8,
    };
    let id = format!("{}-{}", kind_label(kind), random_id());
    let track = Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: mime_type.to_owned(),
            ..Default::default()
        },
        id.clone(),
        "callsession-local".to_owned(),
    ));
    SampleTrack {
        info: LocalTrack {
            id,
            kind,
            enabled: true,
        },
        track,
    }
}

fn kind_label(kind: TrackKind) -> &'static str {
    match kind {
        TrackKind::Audio => "audio",
        TrackKind::Video => "video",
    }
}

fn to_rtc_description(desc: &SessionDescription) -> Result<RTCSessionDescription, CallError> {
    let parsed = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp.clone()),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp.clone()),
    };
    parsed.map_err(|e| CallError::pipeline("parse_sdp", e))
}

fn map_state(st: RTCPeerConnectionState) -> PeerState {
    match st {
        RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => PeerState::New,
        RTCPeerConnectionState::Connecting => PeerState::Connecting,
        RTCPeerConnectionState::Connected => PeerState::Connected,
        RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
        RTCPeerConnectionState::Failed => PeerState::Failed,
        RTCPeerConnectionState::Closed => PeerState::Closed,
    }
}

#[async_trait]
impl MediaPipeline for WebRtcPipeline {
    async fn acquire_local_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<Vec<LocalTrack>, MediaError> {
        if !constraints.audio && !constraints.video {
            return Err(MediaError::new(
                MediaErrorKind::Unknown,
                "neither audio nor video requested",
            ));
        }

        let mut state = self.state.lock().await;
        state.tracks.clear();
        if constraints.audio {
            state.tracks.push(sample_track(TrackKind::Audio));
        }
        if constraints.video {
            state.tracks.push(sample_track(TrackKind::Video));
        }
        info!(audio = constraints.audio, video = constraints.video, "local media acquired");
        Ok(state.tracks.iter().map(|t| t.info.clone()).collect())
    }

    async fn create_peer_connection(
        &self,
        ice_servers: &[ServerConfig],
    ) -> Result<mpsc::UnboundedReceiver<PeerEvent>, CallError> {
        let pc = Arc::new(
            self.api
                .new_peer_connection(rtc_config(ice_servers))
                .await
                .map_err(|e| CallError::pipeline("new_peer_connection", e))?,
        );

        let tracks: Vec<Arc<TrackLocalStaticSample>> = {
            let state = self.state.lock().await;
            state.tracks.iter().map(|t| t.track.clone()).collect()
        };
        for track in tracks {
            pc.add_track(track as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| CallError::pipeline("add_track", e))?;
        }

        let (tx, rx) = mpsc::unbounded_channel();

        let tx_cand = tx.clone();
        let gathered: Arc<StdMutex<Vec<IceCandidate>>> = Arc::default();
        pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            let mut seen = gathered.lock().unwrap_or_else(|e| e.into_inner());
            match cand {
                Some(c) => match c.to_json() {
                    Ok(init) => {
                        let candidate = IceCandidate::from(init);
                        dump_candidate("LOCAL", &candidate);
                        seen.push(candidate.clone());
                        let _ = tx_cand.send(PeerEvent::LocalCandidate(candidate));
                    }
                    Err(e) => warn!("failed to serialize local candidate: {e}"),
                },
                // cand == None означает конец сбора
                None => {
                    debug!("ICE candidate gathering completed");
                    analyze_candidates(&seen);
                    let _ = tx_cand.send(PeerEvent::GatheringComplete);
                }
            }
            Box::pin(async {})
        }));

        let tx_state = tx.clone();
        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            debug!("peer connection state changed to: {st:?}");
            let _ = tx_state.send(PeerEvent::StateChanged(map_state(st)));
            Box::pin(async {})
        }));

        let tx_track = tx;
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let kind = match track.kind() {
                RTPCodecType::Video => TrackKind::Video,
                _ => TrackKind::Audio,
            };
            debug!(?kind, "remote track added");
            let _ = tx_track.send(PeerEvent::RemoteTrack(kind));
            Box::pin(async {})
        }));

        let mut state = self.state.lock().await;
        state.pending.clear();
        state.peer = Some(pc);
        Ok(rx)
    }

    async fn create_offer(&self) -> Result<SessionDescription, CallError> {
        let pc = self.peer("create_offer").await?;
        let offer = pc
            .create_offer(None)
            .await
            .map_err(|e| CallError::pipeline("create_offer", e))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, CallError> {
        let pc = self.peer("create_answer").await?;
        let answer = pc
            .create_answer(None)
            .await
            .map_err(|e| CallError::pipeline("create_answer", e))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), CallError> {
        let pc = self.peer("set_local_description").await?;
        pc.set_local_description(to_rtc_description(desc)?)
            .await
            .map_err(|e| CallError::pipeline("set_local_description", e))
    }

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<(), CallError> {
        let pc = self.peer("set_remote_description").await?;
        pc.set_remote_description(to_rtc_description(desc)?)
            .await
            .map_err(|e| CallError::pipeline("set_remote_description", e))?;
        self.apply_pending_candidates(&pc).await;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), CallError> {
        let pc = self.state.lock().await.peer.clone();
        match pc {
            Some(pc) if pc.remote_description().await.is_some() => pc
                .add_ice_candidate(RTCIceCandidateInit::from(candidate))
                .await
                .map_err(|e| CallError::pipeline("add_ice_candidate", e)),
            _ => {
                debug!("remote description not set yet, queuing candidate");
                self.state.lock().await.pending.push(candidate.clone());
                Ok(())
            }
        }
    }

    async fn local_tracks(&self) -> Vec<LocalTrack> {
        let state = self.state.lock().await;
        state.tracks.iter().map(|t| t.info.clone()).collect()
    }

    async fn set_track_enabled(&self, track_id: &str, enabled: bool) -> bool {
        let mut state = self.state.lock().await;
        match state.tracks.iter_mut().find(|t| t.info.id == track_id) {
            Some(t) => {
                t.info.enabled = enabled;
                true
            }
            None => false,
        }
    }

    async fn connection_state(&self) -> PeerState {
        match self.state.lock().await.peer.as_ref() {
            Some(pc) => map_state(pc.connection_state()),
            None => PeerState::Closed,
        }
    }

    async fn close(&self) {
        let (pc, _tracks) = {
            let mut state = self.state.lock().await;
            state.pending.clear();
            (state.peer.take(), std::mem::take(&mut state.tracks))
        };
        if let Some(pc) = pc {
            if let Err(e) = pc.close().await {
                warn!("error while closing peer connection: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquiring_video_call_media_yields_two_tracks() {
        let pipeline = WebRtcPipeline::new().unwrap();
        let tracks = pipeline
            .acquire_local_media(MediaConstraints { audio: true, video: true })
            .await
            .unwrap();
        assert_eq!(tracks.len(), 2);
        assert!(tracks.iter().all(|t| t.enabled));

        let audio = tracks.iter().find(|t| t.kind == TrackKind::Audio).unwrap();
        assert!(pipeline.set_track_enabled(&audio.id, false).await);
        assert!(!pipeline.set_track_enabled("missing", false).await);
        let after = pipeline.local_tracks().await;
        assert!(!after.iter().find(|t| t.id == audio.id).unwrap().enabled);
    }

    #[tokio::test]
    async fn candidates_before_remote_description_are_queued() {
        let pipeline = WebRtcPipeline::new().unwrap();
        pipeline
            .acquire_local_media(MediaConstraints { audio: true, video: false })
            .await
            .unwrap();
        let _events = pipeline.create_peer_connection(&[]).await.unwrap();

        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 2122260223 192.168.1.4 54000 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        };
        pipeline.add_ice_candidate(&candidate).await.unwrap();
        assert_eq!(pipeline.state.lock().await.pending.len(), 1);

        pipeline.close().await;
        assert_eq!(pipeline.connection_state().await, PeerState::Closed);
        assert!(pipeline.local_tracks().await.is_empty());
    }

    #[tokio::test]
    async fn offer_is_produced_after_media_is_attached() {
        let pipeline = WebRtcPipeline::new().unwrap();
        pipeline
            .acquire_local_media(MediaConstraints { audio: true, video: false })
            .await
            .unwrap();
        let _events = pipeline.create_peer_connection(&[]).await.unwrap();
        let offer = pipeline.create_offer().await.unwrap();
        assert_eq!(offer.sdp_type, SdpType::Offer);
        assert!(offer.sdp.starts_with("v=0"));
        pipeline.set_local_description(&offer).await.unwrap();
        pipeline.close().await;
    }
}
