use crate::error::{Error, Result};
use crate::peer::engine::PeerCapability;
use crate::peer::types::{IceCandidate, IceServer};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// STUN сервер, который используется всегда
pub static DEFAULT_ICE_SERVERS: Lazy<Vec<IceServer>> =
    Lazy::new(|| vec![IceServer::stun("stun:stun.l.google.com:19302")]);

/// Таймаут запроса конфигурации TURN
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Кандидаты, полученные до установки remote description.
///
/// Применяются строго в порядке получения.
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    queue: VecDeque<IceCandidate>,
}

impl CandidateBuffer {
    pub fn enqueue(&mut self, candidate: IceCandidate) {
        self.queue.push_back(candidate);
        debug!(queued = self.queue.len(), "remote description not set yet, candidate queued");
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Очищает буфер, возвращает число выброшенных кандидатов
    pub fn clear(&mut self) -> usize {
        let n = self.queue.len();
        self.queue.clear();
        n
    }

    /// Применяет отложенные кандидаты после установки remote description.
    ///
    /// Плохой кандидат пропускается. Если remote description пропал,
    /// кандидат возвращается в голову очереди и обработка останавливается.
    pub async fn drain(&mut self, peer: &dyn PeerCapability) -> usize {
        let mut applied = 0;

        while let Some(candidate) = self.queue.pop_front() {
            if !peer.has_remote_description().await {
                self.queue.push_front(candidate);
                break;
            }

            debug!(candidate = %candidate.candidate, "applying pending candidate");
            match peer.add_ice_candidate(candidate.clone()).await {
                Ok(()) => applied += 1,
                Err(Error::RemoteDescriptionMissing) => {
                    self.queue.push_front(candidate);
                    break;
                }
                Err(e) => warn!("failed to apply pending candidate: {}", e),
            }
        }

        if !self.queue.is_empty() {
            debug!(left = self.queue.len(), "candidate drain stopped early");
        }
        applied
    }
}

/// Разбор набора кандидатов по типам, предупреждает если нет relay
pub fn analyze_candidates(candidates: &[IceCandidate]) {
    let mut host_count = 0;
    let mut srflx_count = 0;
    let mut relay_count = 0;

    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            host_count += 1;
        } else if candidate.candidate.contains("typ srflx") {
            srflx_count += 1;
        } else if candidate.candidate.contains("typ relay") {
            relay_count += 1;
        }
    }

    info!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        host_count, srflx_count, relay_count
    );

    if relay_count == 0 {
        warn!("No TURN relay candidates found! Connection through NAT may fail.");
    }
}

/// Источник TURN/STUN описаний
#[async_trait]
pub trait IceServerSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<IceServer>>;
}

#[derive(Deserialize)]
struct TurnConfigResponse {
    #[serde(rename = "iceServers", default)]
    ice_servers: Vec<IceServer>,
}

/// Забирает TURN описания с HTTP эндпоинта конфигурации
pub struct HttpIceServerSource {
    url: String,
    client: reqwest::Client,
}

impl HttpIceServerSource {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| Error::IceConfig(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl IceServerSource for HttpIceServerSource {
    async fn fetch(&self) -> Result<Vec<IceServer>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::IceConfig(e.to_string()))?;
        let body: TurnConfigResponse = response
            .json()
            .await
            .map_err(|e| Error::IceConfig(e.to_string()))?;
        Ok(body.ice_servers)
    }
}

/// Список ICE серверов. Запрашивается один раз и живёт до конца процесса;
/// при ошибке остаётся только STUN по умолчанию.
pub struct IceServerProvider {
    source: Option<Arc<dyn IceServerSource>>,
    cache: OnceCell<Vec<IceServer>>,
}

impl IceServerProvider {
    pub fn new(source: Option<Arc<dyn IceServerSource>>) -> Self {
        Self {
            source,
            cache: OnceCell::new(),
        }
    }

    pub async fn servers(&self) -> Vec<IceServer> {
        self.cache
            .get_or_init(|| async {
                let mut servers = DEFAULT_ICE_SERVERS.clone();
                match &self.source {
                    Some(source) => match source.fetch().await {
                        Ok(fetched) => {
                            info!(count = fetched.len(), "fetched TURN configuration");
                            servers.extend(fetched);
                        }
                        Err(e) => warn!("could not fetch TURN config, using STUN only: {}", e),
                    },
                    None => debug!("no TURN config endpoint, using STUN only"),
                }
                servers
            })
            .await
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::types::{LocalTrack, MediaKind, SessionDescription};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedPeer {
        remote_set: AtomicBool,
        applied: Mutex<Vec<String>>,
        reject: Option<&'static str>,
        unset_after: Option<usize>,
    }

    #[async_trait]
    impl PeerCapability for ScriptedPeer {
        async fn add_track(&self, _track: &LocalTrack) -> Result<()> {
            Ok(())
        }
        fn has_track(&self, _kind: MediaKind) -> bool {
            false
        }
        async fn set_track_enabled(&self, _kind: MediaKind, _enabled: bool) -> Result<bool> {
            Ok(false)
        }
        async fn create_offer(&self, _ice_restart: bool) -> Result<SessionDescription> {
            Ok(SessionDescription::offer("v=0"))
        }
        async fn create_answer(&self) -> Result<SessionDescription> {
            Ok(SessionDescription::answer("v=0"))
        }
        async fn set_local_description(&self, _desc: SessionDescription) -> Result<()> {
            Ok(())
        }
        async fn set_remote_description(&self, _desc: SessionDescription) -> Result<()> {
            self.remote_set.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn has_remote_description(&self) -> bool {
            self.remote_set.load(Ordering::SeqCst)
        }
        async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
            if self.reject == Some(candidate.candidate.as_str()) {
                return Err(Error::CandidateRejected(candidate.candidate));
            }
            let mut applied = self.applied.lock().unwrap();
            applied.push(candidate.candidate);
            if self.unset_after == Some(applied.len()) {
                self.remote_set.store(false, Ordering::SeqCst);
            }
            Ok(())
        }
        fn is_terminal(&self) -> bool {
            false
        }
        async fn close(&self) {}
    }

    fn buffer_of(names: &[&str]) -> CandidateBuffer {
        let mut buffer = CandidateBuffer::default();
        for name in names {
            buffer.enqueue(IceCandidate::new(*name));
        }
        buffer
    }

    #[tokio::test]
    async fn drain_applies_in_receipt_order() {
        let peer = ScriptedPeer::default();
        peer.remote_set.store(true, Ordering::SeqCst);
        let mut buffer = buffer_of(&["c1", "c2", "c3"]);

        assert_eq!(buffer.drain(&peer).await, 3);
        assert!(buffer.is_empty());
        assert_eq!(*peer.applied.lock().unwrap(), vec!["c1", "c2", "c3"]);
    }

    #[tokio::test]
    async fn drain_without_remote_description_keeps_everything() {
        let peer = ScriptedPeer::default();
        let mut buffer = buffer_of(&["c1", "c2"]);

        assert_eq!(buffer.drain(&peer).await, 0);
        assert_eq!(buffer.len(), 2);
        assert!(peer.applied.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn bad_candidate_does_not_block_the_rest() {
        let peer = ScriptedPeer {
            reject: Some("bad"),
            ..Default::default()
        };
        peer.remote_set.store(true, Ordering::SeqCst);
        let mut buffer = buffer_of(&["c1", "bad", "c2"]);

        assert_eq!(buffer.drain(&peer).await, 2);
        assert!(buffer.is_empty());
        assert_eq!(*peer.applied.lock().unwrap(), vec!["c1", "c2"]);
    }

    #[tokio::test]
    async fn remote_description_lost_mid_drain_keeps_the_tail() {
        let peer = ScriptedPeer {
            unset_after: Some(1),
            ..Default::default()
        };
        peer.remote_set.store(true, Ordering::SeqCst);
        let mut buffer = buffer_of(&["c1", "c2", "c3"]);

        assert_eq!(buffer.drain(&peer).await, 1);
        assert_eq!(buffer.len(), 2);

        peer.remote_set.store(true, Ordering::SeqCst);
        buffer.drain(&peer).await;
        assert_eq!(*peer.applied.lock().unwrap(), vec!["c1", "c2", "c3"]);
    }

    struct CountingSource {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl IceServerSource for CountingSource {
        async fn fetch(&self) -> Result<Vec<IceServer>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::IceConfig("503".into()));
            }
            Ok(vec![IceServer {
                urls: vec!["turn:relay.local:3478".into()],
                username: Some("user".into()),
                credential: Some("secret".into()),
            }])
        }
    }

    #[tokio::test]
    async fn ice_servers_are_fetched_once_and_prefixed_with_stun() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let provider = IceServerProvider::new(Some(source.clone()));

        let first = provider.servers().await;
        let second = provider.servers().await;
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].urls, vec!["stun:stun.l.google.com:19302"]);
        assert!(first[1].has_credentials());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fetch_failure_degrades_to_stun_only() {
        let provider = IceServerProvider::new(Some(Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            fail: true,
        })));
        assert_eq!(provider.servers().await, *DEFAULT_ICE_SERVERS);
    }
}
