use crate::error::{Error, Result};
use crate::logger::{dump_candidate, dump_selected_pair};
use crate::peer::engine::{PeerCapability, PeerEvents, PeerFactory};
use crate::peer::ice::analyze_candidates;
use crate::peer::types::{
    ConnectivityState, IceCandidate, IceServer, LocalTrack, MediaKind, SdpType, SessionDescription,
};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Фабрика peer соединений на webrtc-rs
#[derive(Debug, Default, Clone, Copy)]
pub struct RtcPeerFactory;

impl RtcPeerFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PeerFactory for RtcPeerFactory {
    async fn create(&self, ice_servers: &[IceServer], events: PeerEvents) -> Result<Arc<dyn PeerCapability>> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::PeerSetup(e.to_string()))?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| Error::PeerSetup(e.to_string()))?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(
            api.new_peer_connection(rtc_config(ice_servers))
                .await
                .map_err(|e| Error::PeerSetup(e.to_string()))?,
        );
        attach_handlers(&pc, events);

        Ok(Arc::new(RtcPeer {
            pc,
            outbound: Mutex::new(HashMap::new()),
        }))
    }
}

/// Создает конфигурацию для peer connection
fn rtc_config(servers: &[IceServer]) -> RTCConfiguration {
    let ice_servers = servers
        .iter()
        .map(|server| RTCIceServer {
            urls: server
                .urls
                .iter()
                .map(|url| add_ice_url_scheme(url, server.has_credentials()))
                .collect(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
        })
        .collect();

    RTCConfiguration {
        ice_servers,
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

fn attach_handlers(pc: &Arc<RTCPeerConnection>, events: PeerEvents) {
    // кандидаты текущего сбора, для анализа в конце
    let gathered: Arc<Mutex<Vec<IceCandidate>>> = Arc::new(Mutex::new(Vec::new()));

    let candidate_events = events.clone();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        match cand {
            Some(c) => match c.to_json() {
                Ok(init) => {
                    let candidate = IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    };
                    dump_candidate("LOCAL", &candidate);
                    if let Ok(mut list) = gathered.lock() {
                        list.push(candidate.clone());
                    }
                    candidate_events.local_candidate(candidate);
                }
                Err(e) => warn!("failed to serialize local candidate: {}", e),
            },
            None => {
                // cand == None означает конец сбора
                debug!("ICE candidate gathering completed");
                if let Ok(mut list) = gathered.lock() {
                    analyze_candidates(&list);
                    list.clear();
                }
            }
        }
        Box::pin(async {})
    }));

    let track_events = events.clone();
    pc.on_track(Box::new(move |track: Arc<TrackRemote>, _, _| {
        match track.kind() {
            RTPCodecType::Audio => track_events.remote_track(MediaKind::Audio),
            RTPCodecType::Video => track_events.remote_track(MediaKind::Video),
            other => debug!(?other, "ignoring track of unknown kind"),
        }
        Box::pin(async {})
    }));

    // слабая ссылка, чтобы обработчик не держал peer живым
    let pc_stats = Arc::downgrade(pc);
    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        info!(session = %events.session(), "Peer connection state changed to: {:?}", st);

        let state = match st {
            RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => ConnectivityState::New,
            RTCPeerConnectionState::Connecting => ConnectivityState::Checking,
            RTCPeerConnectionState::Connected => ConnectivityState::Connected,
            RTCPeerConnectionState::Disconnected => ConnectivityState::Disconnected,
            RTCPeerConnectionState::Failed => ConnectivityState::Failed,
            RTCPeerConnectionState::Closed => ConnectivityState::Closed,
        };

        if matches!(state, ConnectivityState::Disconnected | ConnectivityState::Failed) {
            if let Some(pc) = pc_stats.upgrade() {
                tokio::spawn(async move {
                    dump_selected_pair(&pc, "BEFORE-FAIL").await;
                });
            }
        }

        events.connectivity(state);
        Box::pin(async {})
    }));
}

struct OutboundTrack {
    track: Arc<TrackLocalStaticSample>,
    sender: Arc<RTCRtpSender>,
}

/// Peer на webrtc-rs
pub struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
    outbound: Mutex<HashMap<MediaKind, OutboundTrack>>,
}

impl RtcPeer {
    fn outbound(&self) -> MutexGuard<'_, HashMap<MediaKind, OutboundTrack>> {
        self.outbound.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn codec_for(kind: MediaKind) -> RTCRtpCodecCapability {
    match kind {
        MediaKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: 2,
            sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
            rtcp_feedback: vec![],
        },
        MediaKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90000,
            channels: 0,
            sdp_fmtp_line: String::new(),
            rtcp_feedback: vec![],
        },
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
    let rtc = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
        SdpType::Rollback => {
            return Err(Error::DescriptionRejected("rollback is not supported".into()));
        }
    };
    rtc.map_err(|e| Error::DescriptionRejected(e.to_string()))
}

fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription> {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        RTCSdpType::Unspecified => {
            return Err(Error::DescriptionRejected("description without type".into()));
        }
    };
    Ok(SessionDescription {
        sdp_type,
        sdp: desc.sdp,
    })
}

#[async_trait]
impl PeerCapability for RtcPeer {
    async fn add_track(&self, track: &LocalTrack) -> Result<()> {
        if self.has_track(track.kind) {
            return Ok(());
        }

        let local = Arc::new(TrackLocalStaticSample::new(
            codec_for(track.kind),
            track.id.clone(),
            track.stream_id.clone(),
        ));
        let sender = self
            .pc
            .add_track(local.clone() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| Error::PeerSetup(format!("failed to add {} track: {}", track.kind, e)))?;

        // RTCP нужно вычитывать, иначе интерсепторы не работают
        let rtcp = sender.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtcp.read(&mut buf).await.is_ok() {}
        });

        self.outbound().insert(track.kind, OutboundTrack { track: local, sender });
        Ok(())
    }

    fn has_track(&self, kind: MediaKind) -> bool {
        self.outbound().contains_key(&kind)
    }

    async fn set_track_enabled(&self, kind: MediaKind, enabled: bool) -> Result<bool> {
        let entry = self
            .outbound()
            .get(&kind)
            .map(|t| (t.track.clone(), t.sender.clone()));
        let Some((track, sender)) = entry else {
            return Ok(false);
        };

        // без трека sender ничего не отправляет
        let replacement = enabled.then(|| track as Arc<dyn TrackLocal + Send + Sync>);
        sender
            .replace_track(replacement)
            .await
            .map_err(|e| Error::PeerSetup(e.to_string()))?;
        Ok(true)
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription> {
        let options = RTCOfferOptions {
            ice_restart,
            ..Default::default()
        };
        let offer = self
            .pc
            .create_offer(Some(options))
            .await
            .map_err(|e| Error::DescriptionRejected(e.to_string()))?;
        from_rtc(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| Error::DescriptionRejected(e.to_string()))?;
        from_rtc(answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc
            .set_local_description(to_rtc(desc)?)
            .await
            .map_err(|e| Error::DescriptionRejected(e.to_string()))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc
            .set_remote_description(to_rtc(desc)?)
            .await
            .map_err(|e| Error::DescriptionRejected(e.to_string()))
    }

    async fn has_remote_description(&self) -> bool {
        self.pc.remote_description().await.is_some()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        if !self.has_remote_description().await {
            return Err(Error::RemoteDescriptionMissing);
        }
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::CandidateRejected(e.to_string()))
    }

    fn is_terminal(&self) -> bool {
        self.pc.connection_state() == RTCPeerConnectionState::Closed
            || self.pc.signaling_state() == RTCSignalingState::Closed
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!("failed to close peer connection: {}", e);
        }
    }
}
