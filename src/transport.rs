use crate::error::{Error, Result};
use crate::signaling::{Input, SignalMessage, SignalingChannel};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Исходящая сторона websocket канала к реле
pub struct WsSignaling {
    tx: mpsc::UnboundedSender<String>,
}

impl WsSignaling {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl SignalingChannel for WsSignaling {
    async fn send(&self, message: SignalMessage) -> Result<()> {
        let text = message.to_json()?;
        self.tx.send(text).map_err(|_| Error::TransportClosed)
    }
}

/// Держит соединение с реле и переподключается после обрыва.
///
/// Открытие даёт `Input::TransportOpened`, обрыв - `transport-closed`.
/// Всё, что накопилось в исходящей очереди за время обрыва, выбрасывается.
pub async fn run_transport(
    url: String,
    inbox: mpsc::UnboundedSender<Input>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    reconnect_delay: Duration,
) {
    loop {
        match connect_async(url.as_str()).await {
            Ok((stream, _)) => {
                info!(%url, "signaling socket open");

                let mut stale = 0;
                while outbound.try_recv().is_ok() {
                    stale += 1;
                }
                if stale > 0 {
                    warn!(stale, "dropped messages queued while the socket was down");
                }
                if inbox.send(Input::TransportOpened).is_err() {
                    return;
                }

                let (mut write, mut read) = stream.split();
                loop {
                    tokio::select! {
                        incoming = read.next() => match incoming {
                            Some(Ok(Message::Text(text))) => {
                                if inbox.send(Input::Raw(text.as_str().to_owned())).is_err() {
                                    return;
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                info!(?frame, "signaling socket closed by relay");
                                break;
                            }
                            Some(Ok(other)) => debug!("ignoring non-text frame: {:?}", other),
                            Some(Err(e)) => {
                                warn!("signaling socket error: {}", e);
                                break;
                            }
                            None => break,
                        },
                        out = outbound.recv() => match out {
                            Some(text) => {
                                if let Err(e) = write.send(Message::Text(text.into())).await {
                                    warn!("signaling send failed: {}", e);
                                    break;
                                }
                            }
                            None => {
                                // диспетчер остановлен
                                let _ = write.close().await;
                                return;
                            }
                        },
                    }
                }

                if inbox.send(Input::Signal(SignalMessage::TransportClosed)).is_err() {
                    return;
                }
            }
            Err(e) => warn!(%url, "signaling connect failed: {}", e),
        }

        if inbox.is_closed() {
            return;
        }
        debug!("reconnecting in {} ms", reconnect_delay.as_millis());
        sleep(reconnect_delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn outbound_messages_are_serialized() {
        let (channel, mut rx) = WsSignaling::new();
        channel.send(SignalMessage::Ready).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), r#"{"type":"ready_for_peer"}"#);
    }

    #[tokio::test]
    async fn send_after_transport_gone_is_an_error() {
        let (channel, rx) = WsSignaling::new();
        drop(rx);
        assert!(matches!(
            channel.send(SignalMessage::leave()).await,
            Err(Error::TransportClosed)
        ));
    }
}
