use thiserror::Error;

/// Ошибки оркестратора звонка.
///
/// Локальные ошибки (один кандидат, один статус) никогда не обрывают сессию,
/// ошибки согласования описаний всегда обрывают её и запускают повторный поиск пары.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed signaling message: {0}")]
    MalformedMessage(String),

    #[error("description rejected: {0}")]
    DescriptionRejected(String),

    #[error("candidate rejected: {0}")]
    CandidateRejected(String),

    /// Кандидат нельзя применить: remote description ещё не установлен
    #[error("remote description is not set")]
    RemoteDescriptionMissing,

    #[error("media capability unavailable: {0}")]
    CapabilityUnavailable(String),

    /// Медиа/ICE движок не смог создать или настроить peer
    #[error("peer setup failed: {0}")]
    PeerSetup(String),

    #[error("connectivity lost: {0}")]
    ConnectivityLost(String),

    #[error("signaling transport closed")]
    TransportClosed,

    #[error("dispatcher is not running")]
    DispatcherStopped,

    #[error("ice server configuration: {0}")]
    IceConfig(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Ошибка обрывает текущую сессию
    pub fn is_session_fatal(&self) -> bool {
        !matches!(
            self,
            Error::MalformedMessage(_)
                | Error::CandidateRejected(_)
                | Error::RemoteDescriptionMissing
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
