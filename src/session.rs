//! One authenticated user's notification session: the store plus the live
//! channel feeding it.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use crate::api::{HttpNotificationsApi, NotificationsApi};
use crate::config::AppConfig;
use crate::notifications::{NotificationEffects, NotificationStore, StoreSettings};
use crate::realtime::{
    ChannelHandle, ChannelState, RealtimeChannel, RealtimeTransport, ReconnectPolicy,
    WebSocketTransport,
};

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub user_id: String,
    pub token: String,
    pub store: StoreSettings,
    pub reconnect: ReconnectPolicy,
}

pub struct NotificationSession {
    store: Arc<NotificationStore>,
    channel: ChannelHandle,
}

impl NotificationSession {
    /// Load the first page and open the user's channel. Must be called
    /// within a tokio runtime.
    pub fn start(
        api: Arc<dyn NotificationsApi>,
        transport: Arc<dyn RealtimeTransport>,
        effects: Arc<dyn NotificationEffects>,
        options: SessionOptions,
    ) -> Self {
        let store = Arc::new(NotificationStore::new(api, effects, options.store));
        if options.store.desktop_enabled {
            store.set_desktop_enabled(true);
        }

        tokio::spawn({
            let store = store.clone();
            async move {
                store.fetch_page(1).await;
            }
        });

        let channel = RealtimeChannel::new(
            transport,
            store.clone(),
            &options.user_id,
            options.token,
            options.reconnect,
        )
        .spawn();

        info!("Notification session started for user {}", options.user_id);
        Self { store, channel }
    }

    pub fn from_config(config: &AppConfig, effects: Arc<dyn NotificationEffects>) -> Self {
        let api = HttpNotificationsApi::new(
            config.api_base_url.clone(),
            config.token.clone(),
            config.user_id.clone(),
            config.request_timeout_sec,
        );
        let transport = WebSocketTransport::new(config.ws_url.clone());

        Self::start(
            Arc::new(api),
            Arc::new(transport),
            effects,
            SessionOptions {
                user_id: config.user_id.clone(),
                token: config.token.clone(),
                store: config.store_settings(),
                reconnect: config.reconnect_policy(),
            },
        )
    }

    pub fn store(&self) -> &Arc<NotificationStore> {
        &self.store
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel.state()
    }

    pub fn watch_channel_state(&self) -> watch::Receiver<ChannelState> {
        self.channel.watch_state()
    }

    /// Close the channel for good and forget everything the store holds,
    /// including any first-page request still in flight for this user.
    pub async fn logout(self) {
        self.channel.teardown().await;
        self.store.reset();
        info!("Notification session ended");
    }
}
