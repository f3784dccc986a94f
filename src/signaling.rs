use crate::commands::UserCommand;
use crate::config::RecoveryConfig;
use crate::error::{Error, Result};
use crate::negotiation::NegotiationEngine;
use crate::peer::engine::{PeerEvent, PeerFactory};
use crate::peer::ice::IceServerProvider;
use crate::peer::media::{MediaSource, MediaStatusSync};
use crate::peer::types::{ConnectivityState, IceCandidate, MediaKind, SessionDescription};
use crate::recovery::{RecoveryAction, RecoverySupervisor};
use crate::session::{Phase, Role, Session, SessionId};
use crate::ui::UiSink;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Сигнальное сообщение. Одно и то же представление для входящих и исходящих.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalMessage {
    #[serde(alias = "initiateOffer")]
    PeerAssignCaller,
    #[serde(alias = "waitForOffer")]
    PeerAssignCallee,
    /// Реле сводит пару только после `ready_for_peer`
    #[serde(rename = "ready_for_peer", alias = "ready")]
    Ready,
    Offer {
        offer: SessionDescription,
    },
    Answer {
        answer: SessionDescription,
    },
    /// `candidate: null` означает конец сбора у собеседника
    Ice {
        #[serde(default)]
        candidate: Option<IceCandidate>,
    },
    #[serde(rename = "media_status", alias = "media-status")]
    MediaStatus {
        kind: MediaKind,
        enabled: bool,
    },
    Leave {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    TransportClosed,
}

impl SignalMessage {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| {
            let preview: String = text.chars().take(120).collect();
            Error::MalformedMessage(format!("{} in {:?}", e, preview))
        })
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::MalformedMessage(e.to_string()))
    }

    pub fn leave() -> Self {
        SignalMessage::Leave { reason: None }
    }
}

/// Канал к реле, по которому уходят исходящие сообщения
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    async fn send(&self, message: SignalMessage) -> Result<()>;
}

/// Всё, что попадает в очередь диспетчера
#[derive(Debug)]
pub enum Input {
    /// Сырой текст из сигнального канала
    Raw(String),
    Signal(SignalMessage),
    Peer { session: SessionId, peer: u64, event: PeerEvent },
    RecoveryTimeout { session: SessionId, generation: u64 },
    TransportOpened,
    Command(UserCommand),
}

pub fn mailbox() -> (mpsc::UnboundedSender<Input>, mpsc::UnboundedReceiver<Input>) {
    mpsc::unbounded_channel()
}

/// Внешние зависимости диспетчера
pub struct DispatcherParts {
    pub factory: Arc<dyn PeerFactory>,
    pub media: Arc<dyn MediaSource>,
    pub ice_servers: IceServerProvider,
    pub channel: Arc<dyn SignalingChannel>,
    pub ui: Arc<dyn UiSink>,
    pub recovery: RecoveryConfig,
}

/// Маршрутизатор сигнальных сообщений.
///
/// Обрабатывает вход строго по одному: следующее сообщение берётся из очереди
/// только после того, как предыдущее полностью обработано.
pub struct Dispatcher {
    session: Option<Session>,
    phase: Phase,
    negotiation: NegotiationEngine,
    recovery: RecoverySupervisor,
    media: MediaStatusSync,
    channel: Arc<dyn SignalingChannel>,
    ui: Arc<dyn UiSink>,
    transport_open: bool,
    running: bool,
}

impl Dispatcher {
    pub fn new(parts: DispatcherParts, inbox: mpsc::UnboundedSender<Input>) -> Self {
        Self {
            session: None,
            phase: Phase::Idle,
            negotiation: NegotiationEngine::new(parts.factory, parts.media, parts.ice_servers, inbox.clone()),
            recovery: RecoverySupervisor::new(parts.recovery, inbox),
            media: MediaStatusSync::default(),
            channel: parts.channel,
            ui: parts.ui,
            transport_open: false,
            running: true,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn media_status(&self) -> &MediaStatusSync {
        &self.media
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Input>) {
        info!("dispatcher started");
        while let Some(input) = rx.recv().await {
            self.handle(input).await;
            if !self.running {
                break;
            }
        }
        self.shutdown().await;
        info!("dispatcher stopped");
    }

    /// Обрабатывает один вход; ошибки сюда не выходят, они разбираются внутри
    pub async fn handle(&mut self, input: Input) {
        match input {
            Input::Raw(text) => match SignalMessage::parse(&text) {
                Ok(message) => self.handle_signal(message).await,
                Err(e) => warn!("dropping message: {}", e),
            },
            Input::Signal(message) => self.handle_signal(message).await,
            Input::Peer { session, peer, event } => self.handle_peer_event(session, peer, event).await,
            Input::RecoveryTimeout { session, generation } => {
                if !self.is_current(&session) {
                    debug!(session = %session, "recovery timer for a replaced session ignored");
                    return;
                }
                if self.recovery.on_timeout(generation) == RecoveryAction::Terminate {
                    self.give_up().await;
                }
            }
            Input::TransportOpened => {
                info!("signaling transport connected");
                self.transport_open = true;
                self.ui.on_notification("Connected. Waiting for a peer...");
                self.request_partner().await;
            }
            Input::Command(command) => self.handle_command(command).await,
        }
    }

    async fn handle_signal(&mut self, message: SignalMessage) {
        debug!(?message, "signal received");
        match message {
            SignalMessage::PeerAssignCaller => self.on_assignment(Role::Caller).await,
            SignalMessage::PeerAssignCallee => self.on_assignment(Role::Callee).await,

            SignalMessage::Offer { offer } => {
                let mut session = self.take_session();
                let result = self.negotiation.on_offer(&mut session, offer).await;
                self.session = Some(session);
                self.after_step(result).await;
            }

            SignalMessage::Answer { answer } => {
                let mut session = self.take_session();
                let result = self.negotiation.on_answer(&mut session, answer).await;
                self.session = Some(session);
                if let Err(e) = result {
                    self.fail(e).await;
                }
            }

            SignalMessage::Ice { candidate: Some(candidate) } => {
                let mut session = self.take_session();
                self.negotiation.on_remote_candidate(&mut session, candidate).await;
                self.session = Some(session);
            }
            SignalMessage::Ice { candidate: None } => debug!("remote end of candidates"),

            SignalMessage::MediaStatus { kind, enabled } => {
                self.media.on_remote_status(kind, enabled, self.ui.as_ref());
            }

            SignalMessage::Leave { reason } => {
                info!(?reason, "peer left");
                let text = reason.unwrap_or_else(|| "Peer has disconnected.".into());
                self.ui.on_notification(&text);
                self.terminate().await;
                self.request_partner().await;
            }

            SignalMessage::TransportClosed => {
                warn!("{}", Error::TransportClosed);
                self.transport_open = false;
                self.terminate().await;
                self.ui.on_notification("Disconnected. Waiting for the signaling channel...");
            }

            SignalMessage::Ready => debug!("ready is outbound only, ignored"),
        }
    }

    async fn on_assignment(&mut self, role: Role) {
        let mut session = self.take_session();
        let result = self.negotiation.assign(&mut session, role).await;
        self.session = Some(session);

        if result.is_ok() {
            match role {
                Role::Caller => self.ui.on_notification("Peer found! Calling..."),
                _ => self.ui.on_notification("Peer found! Waiting for their call..."),
            }
        }
        self.after_step(result).await;
    }

    /// Общий хвост для шагов согласования, которые могут что-то отправить
    async fn after_step(&mut self, result: Result<Option<SignalMessage>>) {
        match result {
            Ok(outbound) => {
                if matches!(self.phase, Phase::Idle | Phase::AwaitingPeer) {
                    self.set_phase(Phase::Negotiating);
                }
                let peer = self.session.as_ref().and_then(|s| s.peer.clone());
                if let Some(peer) = peer {
                    self.media.apply_local(peer.as_ref()).await;
                }
                if let Some(message) = outbound {
                    self.send(message).await;
                }
            }
            Err(e) => self.fail(e).await,
        }
    }

    async fn handle_peer_event(&mut self, session: SessionId, peer: u64, event: PeerEvent) {
        if !self.is_current(&session) {
            debug!(session = %session, ?event, "event from a replaced session discarded");
            return;
        }
        if self.session.as_ref().is_some_and(|s| s.peer_generation != peer) {
            debug!(session = %session, peer, ?event, "event from a replaced peer discarded");
            return;
        }

        match event {
            PeerEvent::LocalCandidate(candidate) => {
                self.send(SignalMessage::Ice {
                    candidate: Some(candidate),
                })
                .await;
            }
            PeerEvent::RemoteTrack(kind) => {
                info!(%kind, "track received from peer");
                let first = match self.session.as_mut() {
                    Some(s) if !s.remote_media_started => {
                        s.remote_media_started = true;
                        true
                    }
                    _ => false,
                };
                if first {
                    self.ui.on_notification("Call connected!");
                    self.media.announce(self.channel.as_ref()).await;
                }
            }
            PeerEvent::Connectivity(state) => self.on_connectivity(session, state).await,
        }
    }

    async fn on_connectivity(&mut self, session: SessionId, state: ConnectivityState) {
        info!(session = %session, ?state, "connectivity changed");
        if matches!(state, ConnectivityState::Disconnected | ConnectivityState::Failed) {
            if self.phase != Phase::Recovering {
                self.ui.on_notification("Connection problem, trying to recover...");
            }
            self.set_phase(Phase::Recovering);
        }

        match self.recovery.observe(&session, state) {
            RecoveryAction::None => {}
            RecoveryAction::Connected { recovered } => {
                self.set_phase(Phase::Connected);
                if recovered {
                    self.ui.on_notification("Connection recovered");
                }
            }
            RecoveryAction::RestartIce => {
                let mut current = self.take_session();
                let result = self.negotiation.restart_ice(&mut current).await;
                self.session = Some(current);
                match result {
                    Ok(Some(message)) => self.send(message).await,
                    Ok(None) => {}
                    Err(e) => self.fail(e).await,
                }
            }
            RecoveryAction::Terminate => self.give_up().await,
        }
    }

    async fn handle_command(&mut self, command: UserCommand) {
        match command {
            UserCommand::SetMedia { kind, enabled } => self.set_local_media(kind, enabled).await,
            UserCommand::ToggleMedia(kind) => {
                let enabled = !self.media.local().get(kind);
                self.set_local_media(kind, enabled).await;
            }
            UserCommand::NextPartner => {
                info!("user requested a new partner");
                self.send(SignalMessage::leave()).await;
                self.terminate().await;
                self.request_partner().await;
            }
            UserCommand::Phase(reply) => {
                let _ = reply.send(self.phase);
            }
            UserCommand::IsConnected(reply) => {
                let _ = reply.send(self.phase == Phase::Connected);
            }
            UserCommand::Shutdown => self.running = false,
        }
    }

    async fn set_local_media(&mut self, kind: MediaKind, enabled: bool) {
        let peer = self.session.as_ref().and_then(|s| s.peer.clone());
        self.media
            .set_local(kind, enabled, peer.as_deref(), self.channel.as_ref())
            .await;
    }

    /// Разбор ошибки шага согласования
    async fn fail(&mut self, e: Error) {
        match e {
            Error::CapabilityUnavailable(reason) => {
                error!("media unavailable: {}", reason);
                self.ui.on_notification(&format!("Could not access camera/microphone: {}", reason));
                self.terminate().await;
                // освобождаем собеседника, сами ждём решения пользователя
                self.send(SignalMessage::leave()).await;
            }
            e if e.is_session_fatal() => {
                error!("negotiation failed: {}", e);
                self.ui.on_notification("Connection failed. Looking for a new partner...");
                self.send(SignalMessage::leave()).await;
                self.terminate().await;
                self.request_partner().await;
            }
            e => warn!("{}", e),
        }
    }

    /// Восстановление не удалось
    async fn give_up(&mut self) {
        warn!("{}", Error::ConnectivityLost("recovery failed".into()));
        self.ui.on_notification("Connection lost. Searching for a new partner...");
        self.send(SignalMessage::leave()).await;
        self.terminate().await;
        self.request_partner().await;
    }

    /// Уничтожает текущую сессию: peer закрыт, буферы пусты, фаза Idle
    async fn terminate(&mut self) {
        self.recovery.reset();
        if let Some(mut session) = self.session.take() {
            self.set_phase(Phase::Terminated);
            session.dispose().await;
        }
        self.media.reset_remote(self.ui.as_ref());
        self.set_phase(Phase::Idle);
    }

    /// Шлёт `ready` и заводит новую сессию
    async fn request_partner(&mut self) {
        if !self.transport_open {
            debug!("transport is down, partner request postponed");
            return;
        }
        // прежняя сессия закрывается до создания новой
        if let Some(mut old) = self.session.take() {
            self.recovery.reset();
            old.dispose().await;
        }
        self.send(SignalMessage::Ready).await;
        self.session = Some(Session::new());
        self.set_phase(Phase::AwaitingPeer);
    }

    async fn shutdown(&mut self) {
        if self.session.is_some() && self.transport_open {
            self.send(SignalMessage::leave()).await;
        }
        self.terminate().await;
    }

    fn take_session(&mut self) -> Session {
        self.session.take().unwrap_or_default()
    }

    fn is_current(&self, id: &SessionId) -> bool {
        self.session.as_ref().is_some_and(|s| &s.id == id)
    }

    fn set_phase(&mut self, phase: Phase) {
        if let Some(session) = self.session.as_mut() {
            session.phase = phase;
        }
        if self.phase != phase {
            debug!(from = ?self.phase, to = ?phase, "phase changed");
            self.phase = phase;
            self.ui.on_phase_changed(phase);
        }
    }

    async fn send(&self, message: SignalMessage) {
        if let Err(e) = self.channel.send(message).await {
            warn!("failed to send signaling message: {}", e);
        }
    }
}
