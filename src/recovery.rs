use crate::config::{FailedPolicy, RecoveryConfig};
use crate::peer::types::ConnectivityState;
use crate::session::SessionId;
use crate::signaling::Input;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Что диспетчер должен сделать в ответ на сигнал связности
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    None,
    Connected { recovered: bool },
    RestartIce,
    Terminate,
}

struct PendingTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Наблюдает за связностью peer и решает, когда делать ICE restart,
/// а когда сдаться и искать нового собеседника.
///
/// Одновременно взведён не больше одного таймера.
pub struct RecoverySupervisor {
    config: RecoveryConfig,
    inbox: mpsc::UnboundedSender<Input>,
    timer: Option<PendingTimer>,
    generation: u64,
    restart_attempts: u32,
    last_state: ConnectivityState,
    recovering: bool,
}

impl RecoverySupervisor {
    pub fn new(config: RecoveryConfig, inbox: mpsc::UnboundedSender<Input>) -> Self {
        Self {
            config,
            inbox,
            timer: None,
            generation: 0,
            restart_attempts: 0,
            last_state: ConnectivityState::New,
            recovering: false,
        }
    }

    pub fn has_pending_timer(&self) -> bool {
        self.timer.is_some()
    }

    pub fn observe(&mut self, session: &SessionId, state: ConnectivityState) -> RecoveryAction {
        self.last_state = state;

        match state {
            ConnectivityState::New | ConnectivityState::Checking => {
                debug!(session = %session, ?state, "connectivity informational");
                RecoveryAction::None
            }

            ConnectivityState::Connected => {
                self.cancel_timer();
                let recovered = self.recovering;
                self.recovering = false;
                self.restart_attempts = 0;
                RecoveryAction::Connected { recovered }
            }

            ConnectivityState::Disconnected => {
                // старый таймер больше не актуален
                self.cancel_timer();
                self.recovering = true;
                self.start_timer(session, self.config.recovery_window());
                if self.restart_attempts < self.config.max_ice_restarts {
                    self.restart_attempts += 1;
                    RecoveryAction::RestartIce
                } else {
                    debug!(session = %session, "restart budget spent, waiting for recovery window");
                    RecoveryAction::None
                }
            }

            ConnectivityState::Failed => {
                self.recovering = true;
                match self.config.failed_policy {
                    FailedPolicy::ResetImmediately => RecoveryAction::Terminate,
                    FailedPolicy::RestartOnce => {
                        if self.restart_attempts < self.config.max_ice_restarts {
                            self.restart_attempts += 1;
                            self.start_timer(session, self.config.failure_grace_window());
                            RecoveryAction::RestartIce
                        } else if self.timer.is_some() {
                            debug!(session = %session, "failed, restart in progress, waiting for timer");
                            RecoveryAction::None
                        } else {
                            RecoveryAction::Terminate
                        }
                    }
                }
            }

            ConnectivityState::Closed => RecoveryAction::Terminate,
        }
    }

    /// Срабатывание таймера; чужие и отменённые поколения игнорируются
    pub fn on_timeout(&mut self, generation: u64) -> RecoveryAction {
        match &self.timer {
            Some(timer) if timer.generation == generation => {}
            _ => {
                debug!(generation, "stale recovery timer ignored");
                return RecoveryAction::None;
            }
        }
        self.timer = None;

        if self.last_state == ConnectivityState::Connected {
            info!("connection recovered during grace period");
            RecoveryAction::None
        } else {
            warn!(state = ?self.last_state, "recovery window elapsed");
            RecoveryAction::Terminate
        }
    }

    pub fn reset(&mut self) {
        self.cancel_timer();
        self.restart_attempts = 0;
        self.last_state = ConnectivityState::New;
        self.recovering = false;
    }

    fn start_timer(&mut self, session: &SessionId, window: Duration) {
        self.cancel_timer();
        self.generation += 1;
        let generation = self.generation;
        let session = session.clone();
        let inbox = self.inbox.clone();

        debug!(session = %session, generation, "recovery timer started, waiting {} ms", window.as_millis());
        let handle = tokio::spawn(async move {
            sleep(window).await;
            let _ = inbox.send(Input::RecoveryTimeout { session, generation });
        });
        self.timer = Some(PendingTimer { generation, handle });
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            debug!(generation = timer.generation, "aborting pending recovery timer");
            timer.handle.abort();
        }
    }
}

impl Drop for RecoverySupervisor {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}
