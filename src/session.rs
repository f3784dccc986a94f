use crate::peer::engine::PeerCapability;
use crate::peer::ice::CandidateBuffer;
use crate::utils::random_id;
use chrono::{DateTime, Local};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Идентичность сессии; сравнивается перед применением любого асинхронного результата
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(random_id())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Роль назначается реле, локально никогда не выбирается
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Unassigned,
    Caller,
    Callee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AwaitingPeer,
    Negotiating,
    Connected,
    Recovering,
    Terminated,
}

/// Одна попытка звонка. Владеет единственным живым peer и буфером кандидатов.
pub struct Session {
    pub id: SessionId,
    pub role: Role,
    pub phase: Phase,
    pub local_description_set: bool,
    pub remote_description_set: bool,
    /// Offer отправлен, answer ещё не применён
    pub offer_in_flight: bool,
    /// Первый трек собеседника уже пришёл
    pub remote_media_started: bool,
    pub peer: Option<Arc<dyn PeerCapability>>,
    /// Поколение текущего peer; события прежних peer этой сессии отбрасываются
    pub peer_generation: u64,
    pub candidates: CandidateBuffer,
    pub created_at: DateTime<Local>,
}

impl Session {
    pub fn new() -> Self {
        let session = Self {
            id: SessionId::generate(),
            role: Role::Unassigned,
            phase: Phase::Idle,
            local_description_set: false,
            remote_description_set: false,
            offer_in_flight: false,
            remote_media_started: false,
            peer: None,
            peer_generation: 0,
            candidates: CandidateBuffer::default(),
            created_at: Local::now(),
        };
        debug!(session = %session.id, "session created");
        session
    }

    /// Закрывает peer и сбрасывает все буферы
    pub async fn dispose(&mut self) {
        if let Some(peer) = self.peer.take() {
            peer.close().await;
        }
        let dropped = self.candidates.clear();
        self.local_description_set = false;
        self.remote_description_set = false;
        self.offer_in_flight = false;
        info!(
            session = %self.id,
            dropped_candidates = dropped,
            lifetime_ms = (Local::now() - self.created_at).num_milliseconds(),
            "session disposed"
        );
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
