//! HMS Notifications Library
//!
//! Client-side notification pipeline for the hospital management backend:
//! paged REST loading, a live per-user push channel, and the in-memory store
//! both of them feed.

pub mod api;
pub mod config;
pub mod notifications;
pub mod realtime;
pub mod session;

// Re-export commonly used types for convenience
pub use api::{ApiError, HttpNotificationsApi, NotificationsApi};
pub use config::{AppConfig, CliConfig, FileConfig};
pub use notifications::{NotificationRecord, NotificationStore, StoreSnapshot};
pub use realtime::{ChannelState, ReconnectPolicy, WebSocketTransport};
pub use session::{NotificationSession, SessionOptions};
