use crate::error::Result;
use crate::peer::types::{ConnectivityState, IceCandidate, IceServer, LocalTrack, MediaKind, SessionDescription};
use crate::session::SessionId;
use crate::signaling::Input;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// События, которые peer генерирует для диспетчера.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// Собран локальный ICE кандидат, его нужно отправить собеседнику
    LocalCandidate(IceCandidate),
    /// От собеседника пришёл медиа-трек
    RemoteTrack(MediaKind),
    /// Изменилось состояние связности
    Connectivity(ConnectivityState),
}

/// Канал событий peer, помеченный сессией и поколением peer внутри неё.
///
/// События кладутся в ту же очередь, что и сигнальные сообщения,
/// поэтому обрабатываются строго по порядку вместе с ними.
#[derive(Clone)]
pub struct PeerEvents {
    session: SessionId,
    /// Номер peer в сессии; замена закрытого peer увеличивает его
    peer: u64,
    tx: mpsc::UnboundedSender<Input>,
}

impl PeerEvents {
    pub fn new(session: SessionId, peer: u64, tx: mpsc::UnboundedSender<Input>) -> Self {
        Self { session, peer, tx }
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub fn peer(&self) -> u64 {
        self.peer
    }

    pub fn emit(&self, event: PeerEvent) {
        trace!(session = %self.session, peer = self.peer, ?event, "peer event");
        // Диспетчер уже остановлен - событие некому обрабатывать
        let _ = self.tx.send(Input::Peer {
            session: self.session.clone(),
            peer: self.peer,
            event,
        });
    }

    pub fn local_candidate(&self, candidate: IceCandidate) {
        self.emit(PeerEvent::LocalCandidate(candidate));
    }

    pub fn remote_track(&self, kind: MediaKind) {
        self.emit(PeerEvent::RemoteTrack(kind));
    }

    pub fn connectivity(&self, state: ConnectivityState) {
        self.emit(PeerEvent::Connectivity(state));
    }
}

/// Фабрика peer соединений (внешний медиа/ICE движок).
#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(&self, ice_servers: &[IceServer], events: PeerEvents) -> Result<Arc<dyn PeerCapability>>;
}

/// Один живой экземпляр медиа/ICE движка.
#[async_trait]
pub trait PeerCapability: Send + Sync {
    /// Добавляет трек; повторное добавление того же типа ничего не делает
    async fn add_track(&self, track: &LocalTrack) -> Result<()>;

    fn has_track(&self, kind: MediaKind) -> bool;

    /// Включает/выключает отправку трека, возвращает false если трека нет
    async fn set_track_enabled(&self, kind: MediaKind, enabled: bool) -> Result<bool>;

    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    async fn has_remote_description(&self) -> bool;

    /// `Error::RemoteDescriptionMissing` если remote description ещё нет
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Peer закрыт и больше не может использоваться
    fn is_terminal(&self) -> bool;

    async fn close(&self);
}
