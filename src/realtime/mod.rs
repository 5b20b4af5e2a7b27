//! Push delivery of new notifications over a per-user private channel.

mod channel;
pub mod messages;
mod reconnect;
mod transport;

pub use channel::{ChannelHandle, ChannelState, RealtimeChannel};
pub use messages::user_channel;
pub use reconnect::ReconnectPolicy;
pub use transport::{ChannelError, ChannelEvent, RealtimeTransport, Subscription, WebSocketTransport};
