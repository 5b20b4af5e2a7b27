//! Live subscription to the authenticated user's notification channel.
//!
//! Runs in a loop:
//! 1. Connect and subscribe
//! 2. On connect: reconcile with a first-page fetch
//! 3. Forward inbound notifications to the store
//! 4. On error or disconnect: wait according to the reconnect policy and
//!    start over, unless torn down

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::messages::user_channel;
use super::reconnect::ReconnectPolicy;
use super::transport::{ChannelError, RealtimeTransport};
use crate::notifications::NotificationStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
}

pub struct RealtimeChannel {
    transport: Arc<dyn RealtimeTransport>,
    store: Arc<NotificationStore>,
    channel_name: String,
    token: String,
    policy: ReconnectPolicy,
    state: watch::Sender<ChannelState>,
    torn_down: AtomicBool,
}

impl RealtimeChannel {
    pub fn new(
        transport: Arc<dyn RealtimeTransport>,
        store: Arc<NotificationStore>,
        user_id: &str,
        token: String,
        policy: ReconnectPolicy,
    ) -> Self {
        let (state, _) = watch::channel(ChannelState::Disconnected);
        Self {
            transport,
            store,
            channel_name: user_channel(user_id),
            token,
            policy,
            state,
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    /// Start the connection loop on the runtime.
    pub fn spawn(self) -> ChannelHandle {
        let channel = Arc::new(self);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn({
            let channel = channel.clone();
            let shutdown = shutdown.clone();
            async move { channel.run(shutdown).await }
        });

        ChannelHandle {
            channel,
            shutdown,
            task: Some(task),
        }
    }

    /// Connection loop; returns once torn down, cancelled, or out of
    /// reconnect attempts.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("Notification channel {} starting", self.channel_name);
        let mut failures: u32 = 0;

        loop {
            if self.is_torn_down() || shutdown.is_cancelled() {
                break;
            }

            self.set_state(ChannelState::Connecting);
            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                result = self.run_session(&mut failures) => result,
            };
            self.set_state(ChannelState::Disconnected);

            if self.is_torn_down() {
                break;
            }
            if let Err(e) = result {
                warn!("Notification channel {} lost: {}", self.channel_name, e);
            }

            failures += 1;
            if !self.policy.should_retry(failures) {
                error!(
                    "Notification channel {} giving up after {} failed attempts",
                    self.channel_name, failures
                );
                break;
            }

            let delay = self.policy.delay_for(failures);
            info!(
                "Reconnecting notification channel {} in {:?} (attempt {})",
                self.channel_name, delay, failures
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => break,
            }
        }

        self.set_state(ChannelState::Disconnected);
        info!("Notification channel {} stopped", self.channel_name);
    }

    /// One connection, from subscribe until it fails.
    async fn run_session(&self, failures: &mut u32) -> Result<(), ChannelError> {
        let mut subscription = self
            .transport
            .subscribe(&self.channel_name, &self.token)
            .await?;
        if self.is_torn_down() {
            return Ok(());
        }

        self.set_state(ChannelState::Connected);
        *failures = 0;
        info!("Notification channel {} connected", self.channel_name);

        // Pick up whatever arrived while we were away. Runs inside the
        // session so teardown drops it before it can touch the store.
        let reconcile = self.store.fetch_page(1);
        tokio::pin!(reconcile);
        let mut reconciling = true;

        loop {
            tokio::select! {
                _ = &mut reconcile, if reconciling => reconciling = false,
                event = subscription.next() => match event {
                    Some(Ok(payload)) => {
                        if self.is_torn_down() {
                            return Ok(());
                        }
                        self.store.receive_realtime(payload);
                    }
                    Some(Err(e)) => return Err(e),
                    None => {
                        debug!("Subscription to {} ended", self.channel_name);
                        return Err(ChannelError::Closed);
                    }
                },
            }
        }
    }

    fn set_state(&self, state: ChannelState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                debug!("Notification channel {:?} -> {:?}", *current, state);
                *current = state;
                true
            }
        });
    }
}

/// Owner of a running channel. Dropping it tears the channel down without
/// waiting for the loop to finish.
pub struct ChannelHandle {
    channel: Arc<RealtimeChannel>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ChannelHandle {
    pub fn state(&self) -> ChannelState {
        self.channel.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.channel.watch_state()
    }

    pub fn is_torn_down(&self) -> bool {
        self.channel.is_torn_down()
    }

    /// Stop for good: no further reconnects, the connection is closed, and
    /// the loop has exited when this returns.
    pub async fn teardown(mut self) {
        self.mark_torn_down();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Notification channel task ended abnormally: {}", e);
            }
        }
    }

    fn mark_torn_down(&self) {
        self.channel.torn_down.store(true, Ordering::SeqCst);
        self.shutdown.cancel();
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.mark_torn_down();
    }
}
