use super::*;

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU32, Ordering},
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

#[derive(Debug, Clone, Copy)]
enum ConnectOutcome {
    Fail,
    Open,
    OpenFailingSends,
}

struct FakeConnector {
    script: Mutex<VecDeque<ConnectOutcome>>,
    fallback: ConnectOutcome,
    connect_calls: AtomicU32,
    sessions: Mutex<Vec<Arc<FakeSession>>>,
}

impl FakeConnector {
    fn scripted(script: Vec<ConnectOutcome>, fallback: ConnectOutcome) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            connect_calls: AtomicU32::new(0),
            sessions: Mutex::new(Vec::new()),
        }
    }

    fn always_failing() -> Self {
        Self::scripted(Vec::new(), ConnectOutcome::Fail)
    }

    fn always_open() -> Self {
        Self::scripted(Vec::new(), ConnectOutcome::Open)
    }

    fn calls(&self) -> u32 {
        self.connect_calls.load(Ordering::SeqCst)
    }

    fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    fn last_session(&self) -> Arc<FakeSession> {
        self.sessions
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("a session was opened")
    }
}

#[async_trait]
impl ControlConnector for FakeConnector {
    async fn connect(&self, _url: &str) -> Result<Arc<dyn ControlSession>> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);
        match outcome {
            ConnectOutcome::Fail => Err(anyhow!("connection refused")),
            ConnectOutcome::Open | ConnectOutcome::OpenFailingSends => {
                let session = Arc::new(FakeSession::new(matches!(
                    outcome,
                    ConnectOutcome::OpenFailingSends
                )));
                self.sessions.lock().unwrap().push(Arc::clone(&session));
                Ok(session)
            }
        }
    }
}

struct FakeSession {
    frames: Mutex<Vec<Vec<u8>>>,
    close_calls: AtomicU32,
    fail_sends: bool,
    closed_tx: watch::Sender<Option<String>>,
}

impl FakeSession {
    fn new(fail_sends: bool) -> Self {
        let (closed_tx, _) = watch::channel(None);
        Self {
            frames: Mutex::new(Vec::new()),
            close_calls: AtomicU32::new(0),
            fail_sends,
            closed_tx,
        }
    }

    fn drop_from_server(&self, reason: &str) {
        self.closed_tx.send_replace(Some(reason.to_string()));
    }

    fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().unwrap().clone()
    }
}

#[async_trait]
impl ControlSession for FakeSession {
    async fn send_frame(&self, frame: &[u8]) -> Result<()> {
        if self.fail_sends {
            return Err(anyhow!("send rejected"));
        }
        self.frames.lock().unwrap().push(frame.to_vec());
        Ok(())
    }

    async fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn closed_signal(&self) -> watch::Receiver<Option<String>> {
        self.closed_tx.subscribe()
    }
}

fn fast_config() -> ControlChannelConfig {
    ControlChannelConfig {
        url: DEFAULT_CONTROL_URL.to_string(),
        retry_delay: Duration::from_millis(1),
        max_retries: CONTROL_MAX_RETRIES,
    }
}

async fn wait_for_state(channel: &Arc<ControlChannel>, target: ChannelState) {
    let mut states = channel.subscribe_state();
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if *states.borrow_and_update() == target {
                return;
            }
            if states.changed().await.is_err() {
                panic!("state channel dropped");
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {target:?}"));
}

async fn wait_until(description: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {description}"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

#[tokio::test]
async fn gives_up_after_retry_budget_exhausted() {
    let connector = Arc::new(FakeConnector::always_failing());
    let channel = ControlChannel::new_with_connector(
        fast_config(),
        Arc::clone(&connector) as Arc<dyn ControlConnector>,
    );

    channel.start();
    wait_for_state(&channel, ChannelState::Failed).await;
    assert_eq!(connector.calls(), CONTROL_MAX_RETRIES);

    tokio::time::sleep(Duration::from_millis(25)).await;
    assert_eq!(connector.calls(), CONTROL_MAX_RETRIES);
    assert_eq!(channel.state(), ChannelState::Failed);
}

#[tokio::test]
async fn manual_start_after_failure_resets_budget() {
    let connector = Arc::new(FakeConnector::always_failing());
    let channel = ControlChannel::new_with_connector(
        fast_config(),
        Arc::clone(&connector) as Arc<dyn ControlConnector>,
    );

    channel.start();
    wait_for_state(&channel, ChannelState::Failed).await;
    assert_eq!(connector.calls(), CONTROL_MAX_RETRIES);

    channel.start();
    wait_for_state(&channel, ChannelState::Failed).await;
    assert_eq!(connector.calls(), CONTROL_MAX_RETRIES * 2);
}

#[tokio::test]
async fn successful_open_resets_retry_budget() {
    let mut script = vec![ConnectOutcome::Fail; 29];
    script.push(ConnectOutcome::Open);
    let connector = Arc::new(FakeConnector::scripted(script, ConnectOutcome::Fail));
    let channel = ControlChannel::new_with_connector(
        fast_config(),
        Arc::clone(&connector) as Arc<dyn ControlConnector>,
    );

    channel.start();
    wait_for_state(&channel, ChannelState::Open).await;
    assert_eq!(connector.calls(), 30);

    connector.last_session().drop_from_server("bridge restarted");
    wait_for_state(&channel, ChannelState::Failed).await;
    assert_eq!(connector.calls(), 60);
}

#[tokio::test]
async fn start_is_noop_while_active() {
    let connector = Arc::new(FakeConnector::always_open());
    let channel = ControlChannel::new_with_connector(
        fast_config(),
        Arc::clone(&connector) as Arc<dyn ControlConnector>,
    );

    channel.start();
    wait_for_state(&channel, ChannelState::Open).await;
    channel.start();
    channel.start();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(connector.calls(), 1);
    assert_eq!(connector.session_count(), 1);
    assert_eq!(channel.state(), ChannelState::Open);
}

#[tokio::test]
async fn stop_cancels_pending_retry() {
    let connector = Arc::new(FakeConnector::always_failing());
    let config = ControlChannelConfig {
        retry_delay: Duration::from_secs(10),
        ..fast_config()
    };
    let channel = ControlChannel::new_with_connector(
        config,
        Arc::clone(&connector) as Arc<dyn ControlConnector>,
    );

    channel.start();
    let probe = Arc::clone(&channel);
    wait_until("first retry to be pending", move || {
        probe.state() == ChannelState::Retrying { attempt: 1 }
    })
    .await;

    channel.stop().await;
    assert_eq!(channel.state(), ChannelState::Idle);

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(connector.calls(), 1);
}

#[tokio::test]
async fn stop_without_start_is_safe() {
    let connector = Arc::new(FakeConnector::always_open());
    let channel = ControlChannel::new_with_connector(
        fast_config(),
        Arc::clone(&connector) as Arc<dyn ControlConnector>,
    );

    channel.stop().await;
    channel.stop().await;
    assert_eq!(channel.state(), ChannelState::Idle);
    assert_eq!(connector.calls(), 0);
}

#[tokio::test]
async fn stop_closes_open_session_and_is_idempotent() {
    let connector = Arc::new(FakeConnector::always_open());
    let channel = ControlChannel::new_with_connector(
        fast_config(),
        Arc::clone(&connector) as Arc<dyn ControlConnector>,
    );

    channel.start();
    wait_for_state(&channel, ChannelState::Open).await;

    channel.stop().await;
    assert_eq!(channel.state(), ChannelState::Idle);
    let session = connector.last_session();
    assert_eq!(session.close_calls.load(Ordering::SeqCst), 1);

    channel.stop().await;
    assert_eq!(channel.state(), ChannelState::Idle);
    assert_eq!(session.close_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn samples_only_flow_when_open() {
    let connector = Arc::new(FakeConnector::always_open());
    let channel = ControlChannel::new_with_connector(
        fast_config(),
        Arc::clone(&connector) as Arc<dyn ControlConnector>,
    );

    assert_eq!(channel.state(), ChannelState::Idle);
    channel.send_sample(0.5, -0.25).await;

    channel.start();
    wait_for_state(&channel, ChannelState::Open).await;
    channel.send_sample(1.0, -1.0).await;
    channel.send_sample(0.0, 0.0).await;

    let session = connector.last_session();
    assert_eq!(
        session.sent_frames(),
        vec![vec![0xFF, 0x7F, 0x01, 0x80], vec![0, 0, 0, 0]]
    );

    channel.stop().await;
    channel.send_sample(0.7, 0.7).await;
    assert_eq!(session.sent_frames().len(), 2);
}

#[tokio::test]
async fn send_failure_is_swallowed() {
    let connector = Arc::new(FakeConnector::scripted(
        vec![ConnectOutcome::OpenFailingSends],
        ConnectOutcome::Fail,
    ));
    let channel = ControlChannel::new_with_connector(
        fast_config(),
        Arc::clone(&connector) as Arc<dyn ControlConnector>,
    );

    channel.start();
    wait_for_state(&channel, ChannelState::Open).await;

    channel.send_sample(0.3, 0.3).await;
    assert_eq!(channel.state(), ChannelState::Open);
    assert!(connector.last_session().sent_frames().is_empty());
}

#[tokio::test]
async fn dropped_session_triggers_reconnect() {
    let connector = Arc::new(FakeConnector::always_open());
    let channel = ControlChannel::new_with_connector(
        fast_config(),
        Arc::clone(&connector) as Arc<dyn ControlConnector>,
    );

    channel.start();
    wait_for_state(&channel, ChannelState::Open).await;
    assert_eq!(connector.calls(), 1);

    let first = connector.last_session();
    first.drop_from_server("bridge gone");

    let probe = Arc::clone(&connector);
    wait_until("a second connect", move || probe.calls() == 2).await;
    wait_for_state(&channel, ChannelState::Open).await;
    assert_eq!(connector.session_count(), 2);
    assert_eq!(first.close_calls.load(Ordering::SeqCst), 1);
}
