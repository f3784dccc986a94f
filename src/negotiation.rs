//! Обмен offer/answer по назначенной роли.
//!
//! Движок работает с `&mut Session`, поэтому сессия не может смениться
//! посреди шага согласования: результат всегда применяется к той сессии,
//! для которой шаг был начат.

use crate::error::{Error, Result};
use crate::peer::engine::{PeerCapability, PeerEvents, PeerFactory};
use crate::peer::ice::IceServerProvider;
use crate::peer::media::MediaSource;
use crate::peer::types::{IceCandidate, LocalTrack, SessionDescription};
use crate::session::{Role, Session};
use crate::signaling::{Input, SignalMessage};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct NegotiationEngine {
    factory: Arc<dyn PeerFactory>,
    media: Arc<dyn MediaSource>,
    ice_servers: IceServerProvider,
    inbox: mpsc::UnboundedSender<Input>,
    /// Локальные треки захватываются один раз и переиспользуются
    local_tracks: Option<Vec<LocalTrack>>,
}

impl NegotiationEngine {
    pub fn new(
        factory: Arc<dyn PeerFactory>,
        media: Arc<dyn MediaSource>,
        ice_servers: IceServerProvider,
        inbox: mpsc::UnboundedSender<Input>,
    ) -> Self {
        Self {
            factory,
            media,
            ice_servers,
            inbox,
            local_tracks: None,
        }
    }

    async fn acquire_media(&mut self) -> Result<Vec<LocalTrack>> {
        if let Some(tracks) = &self.local_tracks {
            return Ok(tracks.clone());
        }
        let tracks = self.media.acquire().await?;
        info!(count = tracks.len(), "local media acquired");
        self.local_tracks = Some(tracks.clone());
        Ok(tracks)
    }

    /// Возвращает живой peer сессии, создаёт его при необходимости
    pub async fn ensure_peer(&self, session: &mut Session) -> Result<Arc<dyn PeerCapability>> {
        if let Some(peer) = session.peer.take() {
            if !peer.is_terminal() {
                session.peer = Some(peer.clone());
                return Ok(peer);
            }
            debug!(session = %session.id, "peer is closed, replacing it");
            peer.close().await;
            session.local_description_set = false;
            session.remote_description_set = false;
            session.offer_in_flight = false;
        }

        let servers = self.ice_servers.servers().await;
        session.peer_generation += 1;
        let events = PeerEvents::new(session.id.clone(), session.peer_generation, self.inbox.clone());
        let peer = self.factory.create(&servers, events).await?;
        info!(
            session = %session.id,
            peer = session.peer_generation,
            ice_servers = servers.len(),
            "peer created"
        );
        session.peer = Some(peer.clone());
        Ok(peer)
    }

    async fn attach_media(&self, peer: &dyn PeerCapability, tracks: &[LocalTrack]) -> Result<()> {
        for track in tracks {
            if peer.has_track(track.kind) {
                continue;
            }
            peer.add_track(track).await?;
            debug!(kind = %track.kind, id = %track.id, "local track attached");
        }
        Ok(())
    }

    /// Назначение роли от реле
    pub async fn assign(&mut self, session: &mut Session, role: Role) -> Result<Option<SignalMessage>> {
        if session.role != Role::Unassigned {
            if session.role != role {
                warn!(session = %session.id, current = ?session.role, ?role, "role already assigned, ignoring");
                return Ok(None);
            }
            if role == Role::Caller && !session.offer_in_flight {
                // Раунд завершён - повторное назначение запускает пересогласование
                return self.make_offer(session, true).await;
            }
            debug!(session = %session.id, ?role, "duplicate assignment ignored");
            return Ok(None);
        }

        let tracks = self.acquire_media().await?;
        session.role = role;
        let peer = self.ensure_peer(session).await?;
        self.attach_media(peer.as_ref(), &tracks).await?;

        match role {
            Role::Caller => self.make_offer(session, false).await,
            _ => {
                info!(session = %session.id, "waiting for offer");
                Ok(None)
            }
        }
    }

    /// Один offer на раунд: пока answer не применён, новый offer не создаётся
    pub async fn make_offer(&mut self, session: &mut Session, ice_restart: bool) -> Result<Option<SignalMessage>> {
        if session.offer_in_flight {
            debug!(session = %session.id, "offer already in flight");
            return Ok(None);
        }
        let peer = session
            .peer
            .clone()
            .ok_or_else(|| Error::DescriptionRejected("no peer to create offer".into()))?;

        let offer = peer.create_offer(ice_restart).await?;
        peer.set_local_description(offer.clone()).await?;
        session.local_description_set = true;
        session.offer_in_flight = true;
        info!(session = %session.id, ice_restart, "offer created");
        Ok(Some(SignalMessage::Offer { offer }))
    }

    pub async fn on_offer(&mut self, session: &mut Session, offer: SessionDescription) -> Result<Option<SignalMessage>> {
        let tracks = self.acquire_media().await?;
        let peer = self.ensure_peer(session).await?;

        peer.set_remote_description(offer).await?;
        session.remote_description_set = true;
        let applied = session.candidates.drain(peer.as_ref()).await;
        debug!(session = %session.id, applied, "pending candidates drained after offer");

        self.attach_media(peer.as_ref(), &tracks).await?;

        let answer = peer.create_answer().await?;
        peer.set_local_description(answer.clone()).await?;
        session.local_description_set = true;
        info!(session = %session.id, "answer created");
        Ok(Some(SignalMessage::Answer { answer }))
    }

    pub async fn on_answer(&mut self, session: &mut Session, answer: SessionDescription) -> Result<()> {
        let Some(peer) = session.peer.clone() else {
            warn!(session = %session.id, "answer without a peer, dropped");
            return Ok(());
        };
        if !session.offer_in_flight {
            warn!(session = %session.id, "answer without an outstanding offer, dropped");
            return Ok(());
        }

        peer.set_remote_description(answer).await?;
        session.remote_description_set = true;
        session.offer_in_flight = false;
        let applied = session.candidates.drain(peer.as_ref()).await;
        info!(session = %session.id, applied, "answer applied");
        Ok(())
    }

    /// Кандидат собеседника: сразу в peer или в буфер
    pub async fn on_remote_candidate(&self, session: &mut Session, candidate: IceCandidate) {
        let peer = match &session.peer {
            Some(peer) if session.remote_description_set => peer.clone(),
            _ => {
                session.candidates.enqueue(candidate);
                return;
            }
        };

        match peer.add_ice_candidate(candidate.clone()).await {
            Ok(()) => debug!(session = %session.id, "remote candidate applied"),
            Err(Error::RemoteDescriptionMissing) => session.candidates.enqueue(candidate),
            Err(e) => warn!(session = %session.id, "{}", Error::CandidateRejected(e.to_string())),
        }
    }

    /// ICE restart: caller шлёт новый offer, callee ждёт его
    pub async fn restart_ice(&mut self, session: &mut Session) -> Result<Option<SignalMessage>> {
        if session.peer.is_none() {
            return Ok(None);
        }
        match session.role {
            Role::Caller => self.make_offer(session, true).await,
            _ => {
                debug!(session = %session.id, "callee waits for restart offer");
                Ok(None)
            }
        }
    }
}
