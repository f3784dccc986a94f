use crate::config::MediaConfig;
use crate::error::{Error, Result};
use crate::peer::engine::PeerCapability;
use crate::peer::types::{LocalTrack, MediaKind};
use crate::signaling::{SignalMessage, SignalingChannel};
use crate::ui::UiSink;
use crate::utils::random_id;
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// Состояние микрофона и камеры одного участника
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaStatus {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaStatus {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

impl MediaStatus {
    pub fn get(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.audio,
            MediaKind::Video => self.video,
        }
    }

    pub fn set(&mut self, kind: MediaKind, enabled: bool) {
        match kind {
            MediaKind::Audio => self.audio = enabled,
            MediaKind::Video => self.video = enabled,
        }
    }
}

/// Синхронизация mute/camera-off между участниками.
///
/// Удалённый статус меняется только входящими `media-status`,
/// из состояния трека он не выводится.
#[derive(Debug, Default)]
pub struct MediaStatusSync {
    local: MediaStatus,
    remote: MediaStatus,
}

impl MediaStatusSync {
    pub fn local(&self) -> MediaStatus {
        self.local
    }

    pub fn remote(&self) -> MediaStatus {
        self.remote
    }

    pub async fn set_local(
        &mut self,
        kind: MediaKind,
        enabled: bool,
        peer: Option<&dyn PeerCapability>,
        channel: &dyn SignalingChannel,
    ) {
        self.local.set(kind, enabled);
        info!(%kind, enabled, "local media status changed");

        if let Some(peer) = peer {
            match peer.set_track_enabled(kind, enabled).await {
                Ok(true) => debug!(%kind, enabled, "outbound track updated"),
                Ok(false) => debug!(%kind, "no outbound track yet, status only"),
                Err(e) => warn!(%kind, "failed to update outbound track: {}", e),
            }
        }

        // Статус отправляем всегда, даже если трека ещё нет
        if let Err(e) = channel.send(SignalMessage::MediaStatus { kind, enabled }).await {
            warn!(%kind, "failed to send media status: {}", e);
        }
    }

    /// Возвращает true если статус действительно изменился
    pub fn on_remote_status(&mut self, kind: MediaKind, enabled: bool, ui: &dyn UiSink) -> bool {
        if self.remote.get(kind) == enabled {
            debug!(%kind, enabled, "remote media status unchanged");
            return false;
        }
        self.remote.set(kind, enabled);
        ui.on_remote_media_status(kind, enabled);
        true
    }

    /// Отправляет собеседнику текущий локальный статус
    pub async fn announce(&self, channel: &dyn SignalingChannel) {
        for kind in MediaKind::ALL {
            let enabled = self.local.get(kind);
            if let Err(e) = channel.send(SignalMessage::MediaStatus { kind, enabled }).await {
                warn!(%kind, "failed to announce media status: {}", e);
            }
        }
    }

    /// Переносит локальный статус на только что добавленные треки
    pub async fn apply_local(&self, peer: &dyn PeerCapability) {
        for kind in MediaKind::ALL {
            let enabled = self.local.get(kind);
            if enabled || !peer.has_track(kind) {
                continue;
            }
            if let Err(e) = peer.set_track_enabled(kind, false).await {
                warn!(%kind, "failed to mute new track: {}", e);
            }
        }
    }

    /// Сброс при смене собеседника; индикаторы mute убираются
    pub fn reset_remote(&mut self, ui: &dyn UiSink) {
        for kind in MediaKind::ALL {
            if !self.remote.get(kind) {
                ui.on_remote_media_status(kind, true);
            }
        }
        self.remote = MediaStatus::default();
    }
}

/// Источник локальных треков (камера/микрофон)
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self) -> Result<Vec<LocalTrack>>;
}

/// Отдаёт треки по конфигурации; сами сэмплы пишет внешний захват
pub struct StaticMediaSource {
    audio: bool,
    video: bool,
}

impl StaticMediaSource {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            audio: config.audio,
            video: config.video,
        }
    }
}

#[async_trait]
impl MediaSource for StaticMediaSource {
    async fn acquire(&self) -> Result<Vec<LocalTrack>> {
        let stream_id = format!("stream-{}", random_id());
        let tracks: Vec<LocalTrack> = MediaKind::ALL
            .into_iter()
            .filter(|kind| match kind {
                MediaKind::Audio => self.audio,
                MediaKind::Video => self.video,
            })
            .map(|kind| LocalTrack {
                kind,
                id: format!("{}-{}", kind, random_id()),
                stream_id: stream_id.clone(),
            })
            .collect();

        if tracks.is_empty() {
            return Err(Error::CapabilityUnavailable(
                "no audio or video device configured".into(),
            ));
        }
        Ok(tracks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingUi {
        remote: Mutex<Vec<(MediaKind, bool)>>,
    }

    impl UiSink for RecordingUi {
        fn on_phase_changed(&self, _phase: crate::session::Phase) {}
        fn on_remote_media_status(&self, kind: MediaKind, enabled: bool) {
            self.remote.lock().unwrap().push((kind, enabled));
        }
        fn on_notification(&self, _message: &str) {}
    }

    #[test]
    fn remote_status_is_idempotent() {
        let ui = RecordingUi::default();
        let mut sync = MediaStatusSync::default();

        assert!(sync.on_remote_status(MediaKind::Audio, false, &ui));
        assert!(!sync.on_remote_status(MediaKind::Audio, false, &ui));
        assert!(!sync.remote().audio);

        assert!(!sync.on_remote_status(MediaKind::Video, true, &ui));
        assert_eq!(*ui.remote.lock().unwrap(), vec![(MediaKind::Audio, false)]);
    }

    #[test]
    fn reset_clears_muted_indicators() {
        let ui = RecordingUi::default();
        let mut sync = MediaStatusSync::default();
        sync.on_remote_status(MediaKind::Video, false, &ui);

        sync.reset_remote(&ui);
        assert_eq!(sync.remote(), MediaStatus::default());
        assert_eq!(
            *ui.remote.lock().unwrap(),
            vec![(MediaKind::Video, false), (MediaKind::Video, true)]
        );
    }

    #[tokio::test]
    async fn static_source_follows_config() {
        let source = StaticMediaSource::new(&MediaConfig {
            audio: true,
            video: false,
        });
        let tracks = source.acquire().await.unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].kind, MediaKind::Audio);

        let none = StaticMediaSource::new(&MediaConfig {
            audio: false,
            video: false,
        });
        assert!(matches!(none.acquire().await, Err(Error::CapabilityUnavailable(_))));
    }
}
