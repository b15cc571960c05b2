use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error, info};

pub mod frame;
pub mod transport;

use transport::{ControlConnector, ControlSession, WsControlConnector};

pub const DEFAULT_CONTROL_URL: &str = "ws://127.0.0.1:9001";
pub const CONTROL_RETRY_DELAY: Duration = Duration::from_millis(200);
pub const CONTROL_MAX_RETRIES: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Connecting,
    Open,
    Retrying { attempt: u32 },
    Failed,
}

#[derive(Debug, Clone)]
pub struct ControlChannelConfig {
    pub url: String,
    pub retry_delay: Duration,
    pub max_retries: u32,
}

impl Default for ControlChannelConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_CONTROL_URL.to_string(),
            retry_delay: CONTROL_RETRY_DELAY,
            max_retries: CONTROL_MAX_RETRIES,
        }
    }
}

struct LinkState {
    session: Option<Arc<dyn ControlSession>>,
    run_task: Option<JoinHandle<()>>,
}

/// Keeps the low-latency control socket to the local bridge alive. A single
/// task owns the connect/retry loop; samples flow only while the link is
/// `Open` and are dropped silently otherwise.
pub struct ControlChannel {
    config: ControlChannelConfig,
    connector: Arc<dyn ControlConnector>,
    inner: Mutex<LinkState>,
    state_tx: watch::Sender<ChannelState>,
}

impl ControlChannel {
    pub fn new(config: ControlChannelConfig) -> Arc<Self> {
        Self::new_with_connector(config, Arc::new(WsControlConnector))
    }

    pub fn new_with_connector(
        config: ControlChannelConfig,
        connector: Arc<dyn ControlConnector>,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ChannelState::Idle);
        Arc::new(Self {
            config,
            connector,
            inner: Mutex::new(LinkState {
                session: None,
                run_task: None,
            }),
            state_tx,
        })
    }

    /// No-op while the connect/retry loop is already alive. After `stop()` or
    /// `Failed` it launches a fresh loop with the attempt counter at zero.
    pub fn start(self: &Arc<Self>) {
        let mut state = self.guard();
        if let Some(task) = &state.run_task {
            if !task.is_finished() {
                debug!("control link already active");
                return;
            }
        }
        info!(url = %self.config.url, "starting control link");
        let link = Arc::clone(self);
        state.run_task = Some(tokio::spawn(link.run()));
    }

    pub async fn stop(&self) {
        let (task, session) = {
            let mut state = self.guard();
            (state.run_task.take(), state.session.take())
        };
        if let Some(task) = task {
            task.abort();
        }
        if let Some(session) = session {
            session.close().await;
        }
        info!("control link stopped");
        self.transition(ChannelState::Idle);
    }

    pub async fn send_sample(&self, steering: f32, throttle: f32) {
        if self.state() != ChannelState::Open {
            return;
        }
        let session = self.guard().session.clone();
        let Some(session) = session else {
            return;
        };
        let encoded = frame::encode_sample(steering, throttle);
        if let Err(err) = session.send_frame(&encoded).await {
            debug!(error = %err, "control sample dropped");
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.state_tx.subscribe()
    }

    async fn run(self: Arc<Self>) {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            self.transition(ChannelState::Connecting);
            match self.connector.connect(&self.config.url).await {
                Ok(session) => {
                    attempt = 0;
                    let mut closed = session.closed_signal();
                    self.guard().session = Some(Arc::clone(&session));
                    self.transition(ChannelState::Open);
                    info!(url = %self.config.url, "control link open");

                    let reason = loop {
                        if let Some(reason) = closed.borrow_and_update().clone() {
                            break reason;
                        }
                        if closed.changed().await.is_err() {
                            break "session dropped".to_string();
                        }
                    };
                    info!(reason = %reason, "control link closed");
                    session.close().await;
                    self.guard().session = None;
                }
                Err(err) => {
                    debug!(error = %err, attempt, "control connect failed");
                }
            }

            if attempt >= self.config.max_retries {
                error!(
                    attempts = attempt,
                    url = %self.config.url,
                    "control link retries exhausted"
                );
                self.transition(ChannelState::Failed);
                return;
            }
            self.transition(ChannelState::Retrying { attempt });
            tokio::time::sleep(self.config.retry_delay).await;
        }
    }

    fn transition(&self, next: ChannelState) {
        let prev = *self.state_tx.borrow();
        if prev != next {
            debug!(from = ?prev, to = ?next, "control link state");
        }
        self.state_tx.send_replace(next);
    }

    fn guard(&self) -> MutexGuard<'_, LinkState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
