pub mod commands;
pub mod config;
pub mod error;
pub mod logger;
pub mod negotiation;
pub mod peer;
pub mod recovery;
pub mod session;
pub mod signaling;
pub mod transport;
pub mod ui;
pub mod utils;

pub use commands::CallHandle;
pub use config::Config;
pub use error::{Error, Result};
pub use session::{Phase, Role, Session, SessionId};
pub use signaling::{Dispatcher, DispatcherParts, Input, SignalMessage, SignalingChannel};

use crate::peer::{HttpIceServerSource, IceServerProvider, IceServerSource, RtcPeerFactory, StaticMediaSource};
use crate::transport::{run_transport, WsSignaling};
use crate::ui::LogUi;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Сколько ждём, пока транспорт отправит последние сообщения
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Запуск без окна: websocket к реле, webrtc-rs, интерфейс в лог
pub async fn run(config: Config) -> Result<()> {
    let (inbox, rx) = signaling::mailbox();
    let (channel, outbound) = WsSignaling::new();

    let source: Option<Arc<dyn IceServerSource>> = match &config.turn_config_url {
        Some(url) => Some(Arc::new(HttpIceServerSource::new(url.clone())?)),
        None => None,
    };

    let dispatcher = Dispatcher::new(
        DispatcherParts {
            factory: Arc::new(RtcPeerFactory::new()),
            media: Arc::new(StaticMediaSource::new(&config.media)),
            ice_servers: IceServerProvider::new(source),
            channel: Arc::new(channel),
            ui: Arc::new(LogUi),
            recovery: config.recovery.clone(),
        },
        inbox.clone(),
    );

    let handle = CallHandle::new(inbox.clone());
    let transport = tokio::spawn(run_transport(
        config.signaling_url.clone(),
        inbox,
        outbound,
        config.reconnect_delay(),
    ));
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, leaving the call");
            let _ = handle.shutdown();
        }
    });

    dispatcher.run(rx).await;
    interrupt.abort();

    if tokio::time::timeout(FLUSH_TIMEOUT, transport).await.is_err() {
        warn!("signaling transport did not stop in time");
    }
    Ok(())
}
