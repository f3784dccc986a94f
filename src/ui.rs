use crate::peer::types::MediaKind;
use crate::session::Phase;
use tracing::info;

/// Всё, что оркестратор сообщает слою интерфейса.
pub trait UiSink: Send + Sync {
    fn on_phase_changed(&self, phase: Phase);

    /// Показать/убрать индикатор mute собеседника
    fn on_remote_media_status(&self, kind: MediaKind, enabled: bool);

    fn on_notification(&self, message: &str);
}

/// Интерфейс без окна: всё уходит в лог
#[derive(Debug, Default, Clone, Copy)]
pub struct LogUi;

impl UiSink for LogUi {
    fn on_phase_changed(&self, phase: Phase) {
        info!(?phase, "emit phase");
    }

    fn on_remote_media_status(&self, kind: MediaKind, enabled: bool) {
        if enabled {
            info!(%kind, "peer {} on", kind);
        } else {
            info!(%kind, "peer {} muted", kind);
        }
    }

    fn on_notification(&self, message: &str) {
        info!("notification: {}", message);
    }
}
