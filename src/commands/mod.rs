pub mod call_api;

pub use call_api::CallHandle;

use crate::peer::types::MediaKind;
use crate::session::Phase;
use tokio::sync::oneshot;

/// Команды пользователя; идут через ту же очередь, что и сигнальные сообщения
#[derive(Debug)]
pub enum UserCommand {
    SetMedia { kind: MediaKind, enabled: bool },
    ToggleMedia(MediaKind),
    /// Уйти от текущего собеседника и искать нового
    NextPartner,
    Phase(oneshot::Sender<Phase>),
    IsConnected(oneshot::Sender<bool>),
    Shutdown,
}
