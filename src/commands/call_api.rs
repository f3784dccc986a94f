use crate::commands::UserCommand;
use crate::error::{Error, Result};
use crate::peer::types::MediaKind;
use crate::session::Phase;
use crate::signaling::Input;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Ручка для слоя интерфейса
#[derive(Clone)]
pub struct CallHandle {
    tx: mpsc::UnboundedSender<Input>,
}

impl CallHandle {
    pub fn new(tx: mpsc::UnboundedSender<Input>) -> Self {
        Self { tx }
    }

    fn submit(&self, command: UserCommand) -> Result<()> {
        debug!(?command, "command submitted");
        self.tx
            .send(Input::Command(command))
            .map_err(|_| Error::DispatcherStopped)
    }

    /// mute / unmute
    pub fn set_media(&self, kind: MediaKind, enabled: bool) -> Result<()> {
        self.submit(UserCommand::SetMedia { kind, enabled })
    }

    pub fn toggle_media(&self, kind: MediaKind) -> Result<()> {
        self.submit(UserCommand::ToggleMedia(kind))
    }

    pub fn next_partner(&self) -> Result<()> {
        self.submit(UserCommand::NextPartner)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.submit(UserCommand::Shutdown)
    }

    pub async fn phase(&self) -> Result<Phase> {
        let (reply, rx) = oneshot::channel();
        self.submit(UserCommand::Phase(reply))?;
        rx.await.map_err(|_| Error::DispatcherStopped)
    }

    pub async fn is_connected(&self) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.submit(UserCommand::IsConnected(reply))?;
        rx.await.map_err(|_| Error::DispatcherStopped)
    }
}
