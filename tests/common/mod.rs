#![allow(dead_code)]

use async_trait::async_trait;
use callsync_lib::config::{MediaConfig, RecoveryConfig};
use callsync_lib::error::{Error, Result};
use callsync_lib::peer::{
    ConnectivityState, IceCandidate, IceServer, IceServerProvider, LocalTrack, MediaKind, PeerCapability,
    PeerEvents, PeerFactory, SessionDescription, StaticMediaSource,
};
use callsync_lib::session::Phase;
use callsync_lib::signaling::{mailbox, Dispatcher, DispatcherParts, Input, SignalMessage, SignalingChannel};
use callsync_lib::ui::UiSink;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub type Journal = Arc<Mutex<Vec<String>>>;

fn note(journal: &Journal, entry: String) {
    journal.lock().unwrap().push(entry);
}

/// Peer без сети: всё, что с ним делают, пишется в журнал
pub struct FakePeer {
    index: usize,
    journal: Journal,
    remote_set: Mutex<bool>,
    closed: Mutex<bool>,
    tracks: Mutex<HashMap<MediaKind, bool>>,
    applied: Mutex<Vec<String>>,
    offers: Mutex<Vec<bool>>,
}

impl FakePeer {
    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().unwrap().clone()
    }

    /// Флаги ice_restart всех созданных offer
    pub fn offers(&self) -> Vec<bool> {
        self.offers.lock().unwrap().clone()
    }

    pub fn track_enabled(&self, kind: MediaKind) -> Option<bool> {
        self.tracks.lock().unwrap().get(&kind).copied()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }

    /// Движок сам перевёл peer в закрытое состояние, без вызова close
    pub fn shut_down(&self) {
        *self.closed.lock().unwrap() = true;
    }
}

#[async_trait]
impl PeerCapability for FakePeer {
    async fn add_track(&self, track: &LocalTrack) -> Result<()> {
        self.tracks.lock().unwrap().entry(track.kind).or_insert(true);
        Ok(())
    }

    fn has_track(&self, kind: MediaKind) -> bool {
        self.tracks.lock().unwrap().contains_key(&kind)
    }

    async fn set_track_enabled(&self, kind: MediaKind, enabled: bool) -> Result<bool> {
        match self.tracks.lock().unwrap().get_mut(&kind) {
            Some(state) => {
                *state = enabled;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription> {
        self.offers.lock().unwrap().push(ice_restart);
        Ok(SessionDescription::offer(format!("offer-{}", self.index)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        if !*self.remote_set.lock().unwrap() {
            return Err(Error::DescriptionRejected("answer before offer".into()));
        }
        Ok(SessionDescription::answer(format!("answer-{}", self.index)))
    }

    async fn set_local_description(&self, _desc: SessionDescription) -> Result<()> {
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        if desc.sdp == "broken" {
            return Err(Error::DescriptionRejected("unparsable sdp".into()));
        }
        *self.remote_set.lock().unwrap() = true;
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        *self.remote_set.lock().unwrap()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        if !*self.remote_set.lock().unwrap() {
            return Err(Error::RemoteDescriptionMissing);
        }
        if candidate.candidate == "bad" {
            return Err(Error::CandidateRejected("bad".into()));
        }
        self.applied.lock().unwrap().push(candidate.candidate);
        Ok(())
    }

    fn is_terminal(&self) -> bool {
        *self.closed.lock().unwrap()
    }

    async fn close(&self) {
        *self.closed.lock().unwrap() = true;
        note(&self.journal, format!("close:{}", self.index));
    }
}

#[derive(Default)]
pub struct FakePeerFactory {
    pub journal: Journal,
    peers: Mutex<Vec<Arc<FakePeer>>>,
    events: Mutex<Vec<PeerEvents>>,
    fail_next: Mutex<bool>,
}

impl FakePeerFactory {
    /// Следующий create вернёт ошибку движка
    pub fn fail_next_create(&self) {
        *self.fail_next.lock().unwrap() = true;
    }

    pub fn peer(&self, index: usize) -> Arc<FakePeer> {
        self.peers.lock().unwrap()[index].clone()
    }

    pub fn events(&self, index: usize) -> PeerEvents {
        self.events.lock().unwrap()[index].clone()
    }

    pub fn created(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }
}

#[async_trait]
impl PeerFactory for FakePeerFactory {
    async fn create(&self, _ice_servers: &[IceServer], events: PeerEvents) -> Result<Arc<dyn PeerCapability>> {
        if std::mem::take(&mut *self.fail_next.lock().unwrap()) {
            note(&self.journal, "create:failed".into());
            return Err(Error::PeerSetup("no codecs registered".into()));
        }
        let mut peers = self.peers.lock().unwrap();
        let index = peers.len();
        note(&self.journal, format!("create:{}", index));
        let peer = Arc::new(FakePeer {
            index,
            journal: self.journal.clone(),
            remote_set: Mutex::new(false),
            closed: Mutex::new(false),
            tracks: Mutex::new(HashMap::new()),
            applied: Mutex::new(Vec::new()),
            offers: Mutex::new(Vec::new()),
        });
        peers.push(peer.clone());
        self.events.lock().unwrap().push(events);
        Ok(peer)
    }
}

/// Сигнальный канал, который только запоминает отправленное
#[derive(Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<SignalMessage>>,
}

impl RecordingChannel {
    pub fn sent(&self) -> Vec<SignalMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&SignalMessage) -> bool) -> usize {
        self.sent.lock().unwrap().iter().filter(|m| pred(m)).count()
    }

    pub fn readies(&self) -> usize {
        self.count(|m| *m == SignalMessage::Ready)
    }

    pub fn leaves(&self) -> usize {
        self.count(|m| matches!(m, SignalMessage::Leave { .. }))
    }

    pub fn offers(&self) -> usize {
        self.count(|m| matches!(m, SignalMessage::Offer { .. }))
    }

    pub fn answers(&self) -> usize {
        self.count(|m| matches!(m, SignalMessage::Answer { .. }))
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl SignalingChannel for RecordingChannel {
    async fn send(&self, message: SignalMessage) -> Result<()> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingUi {
    pub phases: Mutex<Vec<Phase>>,
    pub notifications: Mutex<Vec<String>>,
    pub remote_status: Mutex<Vec<(MediaKind, bool)>>,
}

impl RecordingUi {
    pub fn phases(&self) -> Vec<Phase> {
        self.phases.lock().unwrap().clone()
    }

    pub fn notifications(&self) -> Vec<String> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn remote_status(&self) -> Vec<(MediaKind, bool)> {
        self.remote_status.lock().unwrap().clone()
    }
}

impl UiSink for RecordingUi {
    fn on_phase_changed(&self, phase: Phase) {
        self.phases.lock().unwrap().push(phase);
    }

    fn on_remote_media_status(&self, kind: MediaKind, enabled: bool) {
        self.remote_status.lock().unwrap().push((kind, enabled));
    }

    fn on_notification(&self, message: &str) {
        self.notifications.lock().unwrap().push(message.to_owned());
    }
}

pub struct Fakes {
    pub factory: Arc<FakePeerFactory>,
    pub channel: Arc<RecordingChannel>,
    pub ui: Arc<RecordingUi>,
}

pub fn parts(recovery: RecoveryConfig, media: MediaConfig) -> (DispatcherParts, Fakes) {
    let fakes = Fakes {
        factory: Arc::new(FakePeerFactory::default()),
        channel: Arc::new(RecordingChannel::default()),
        ui: Arc::new(RecordingUi::default()),
    };
    let parts = DispatcherParts {
        factory: fakes.factory.clone(),
        media: Arc::new(StaticMediaSource::new(&media)),
        ice_servers: IceServerProvider::new(None),
        channel: fakes.channel.clone(),
        ui: fakes.ui.clone(),
        recovery,
    };
    (parts, fakes)
}

/// Диспетчер, которым тест управляет вручную, по одному входу
pub struct Harness {
    pub dispatcher: Dispatcher,
    pub rx: mpsc::UnboundedReceiver<Input>,
    pub inbox: mpsc::UnboundedSender<Input>,
    pub factory: Arc<FakePeerFactory>,
    pub channel: Arc<RecordingChannel>,
    pub ui: Arc<RecordingUi>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(RecoveryConfig::default(), MediaConfig::default())
    }

    pub fn with(recovery: RecoveryConfig, media: MediaConfig) -> Self {
        let (inbox, rx) = mailbox();
        let (parts, fakes) = parts(recovery, media);
        Self {
            dispatcher: Dispatcher::new(parts, inbox.clone()),
            rx,
            inbox,
            factory: fakes.factory,
            channel: fakes.channel,
            ui: fakes.ui,
        }
    }

    /// Обрабатывает вход и всё, что он поставил в очередь
    pub async fn feed(&mut self, input: Input) {
        self.dispatcher.handle(input).await;
        self.pump().await;
    }

    pub async fn raw(&mut self, text: &str) {
        self.feed(Input::Raw(text.to_owned())).await;
    }

    pub async fn pump(&mut self) {
        while let Ok(input) = self.rx.try_recv() {
            self.dispatcher.handle(input).await;
        }
    }

    pub async fn open(&mut self) {
        self.feed(Input::TransportOpened).await;
    }

    /// Событие связности от peer с данным номером
    pub async fn connectivity(&mut self, peer: usize, state: ConnectivityState) {
        self.factory.events(peer).connectivity(state);
        self.pump().await;
    }

    /// Caller, offer отправлен, answer применён, связь есть
    pub async fn connected_caller(&mut self) {
        self.open().await;
        self.raw(r#"{"type":"peer-assign-caller"}"#).await;
        self.raw(&answer_json("answer-0")).await;
        self.connectivity(0, ConnectivityState::Connected).await;
    }
}

pub fn ice_json(candidate: &str) -> String {
    serde_json::json!({
        "type": "ice",
        "candidate": {"candidate": candidate, "sdpMid": "0", "sdpMLineIndex": 0}
    })
    .to_string()
}

pub fn offer_json(sdp: &str) -> String {
    serde_json::json!({"type": "offer", "offer": {"type": "offer", "sdp": sdp}}).to_string()
}

pub fn answer_json(sdp: &str) -> String {
    serde_json::json!({"type": "answer", "answer": {"type": "answer", "sdp": sdp}}).to_string()
}
