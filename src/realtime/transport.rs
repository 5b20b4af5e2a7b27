//! Transports for the per-user push channel.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::Message};
use tracing::{debug, info, warn};

use super::messages::{msg_types, system, ClientMessage, ServerMessage};

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChannelError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Not authorized: {0}")]
    Auth(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection closed")]
    Closed,
}

/// An inbound notification payload, or the error that ended the stream.
pub type ChannelEvent = Result<serde_json::Value, ChannelError>;

/// A live subscription. Dropping it closes the underlying connection.
pub struct Subscription {
    events: mpsc::Receiver<ChannelEvent>,
}

impl Subscription {
    /// A subscription fed through the returned sender.
    pub fn channel(buffer: usize) -> (mpsc::Sender<ChannelEvent>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self { events: rx })
    }

    /// Next event; `None` once the transport has gone away.
    pub async fn next(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    pub fn close(self) {}
}

#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Open a connection authenticated with `token` and subscribe to `channel`.
    ///
    /// Returns once the server has confirmed the subscription.
    async fn subscribe(&self, channel: &str, token: &str) -> Result<Subscription, ChannelError>;
}

/// WebSocket transport speaking the `{type, payload}` envelope protocol.
pub struct WebSocketTransport {
    ws_url: String,
}

impl WebSocketTransport {
    pub fn new(ws_url: String) -> Self {
        Self { ws_url }
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }
}

fn connect_error(err: tungstenite::Error) -> ChannelError {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                ChannelError::Auth(format!("handshake rejected with status {}", status))
            } else {
                ChannelError::Connect(format!("handshake failed with status {}", status))
            }
        }
        other => ChannelError::Connect(other.to_string()),
    }
}

/// Map a server `error` frame to a channel error.
fn server_error(payload: serde_json::Value) -> ChannelError {
    match serde_json::from_value::<system::Error>(payload) {
        Ok(e) if matches!(e.code.as_str(), "unauthorized" | "forbidden") => {
            ChannelError::Auth(format!("{}: {}", e.code, e.message))
        }
        Ok(e) => ChannelError::Protocol(format!("{}: {}", e.code, e.message)),
        Err(_) => ChannelError::Protocol("unspecified server error".to_string()),
    }
}

fn encode(message: &ClientMessage) -> Result<Message, ChannelError> {
    serde_json::to_string(message)
        .map(|text| Message::Text(text.into()))
        .map_err(|e| ChannelError::Protocol(e.to_string()))
}

#[async_trait]
impl RealtimeTransport for WebSocketTransport {
    async fn subscribe(&self, channel: &str, token: &str) -> Result<Subscription, ChannelError> {
        let mut request = self
            .ws_url
            .as_str()
            .into_client_request()
            .map_err(|e| ChannelError::Connect(format!("invalid url {}: {}", self.ws_url, e)))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| ChannelError::Auth(format!("invalid token: {}", e)))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        debug!("Connecting to notification channel at {}", self.ws_url);
        let (ws_stream, _) = connect_async(request).await.map_err(connect_error)?;
        let (mut write, mut read) = ws_stream.split();

        let subscribe = ClientMessage::new(
            msg_types::SUBSCRIBE,
            system::Subscribe {
                channel: channel.to_string(),
            },
        );
        write
            .send(encode(&subscribe)?)
            .await
            .map_err(|e| ChannelError::Connect(e.to_string()))?;

        // Nothing is delivered until the server confirms or refuses.
        let confirmation = async {
            loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        let message = match serde_json::from_str::<ServerMessage>(&text) {
                            Ok(message) => message,
                            Err(e) => {
                                warn!("Failed to parse channel message: {} - {}", e, text.as_str());
                                continue;
                            }
                        };
                        match message.msg_type.as_str() {
                            msg_types::SUBSCRIBED => return Ok::<(), ChannelError>(()),
                            msg_types::ERROR => return Err(server_error(message.payload)),
                            msg_types::PING => {
                                write
                                    .send(encode(&ClientMessage::empty(msg_types::PONG))?)
                                    .await
                                    .map_err(|e| ChannelError::Protocol(e.to_string()))?;
                            }
                            other => debug!("Ignoring {} message before subscription", other),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        write
                            .send(Message::Pong(data))
                            .await
                            .map_err(|e| ChannelError::Protocol(e.to_string()))?;
                    }
                    Some(Ok(Message::Close(_))) | None => return Err(ChannelError::Closed),
                    Some(Err(e)) => return Err(ChannelError::Protocol(e.to_string())),
                    Some(Ok(_)) => {}
                }
            }
        };
        match tokio::time::timeout(SUBSCRIBE_TIMEOUT, confirmation).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("Subscription to {} refused: {}", channel, e);
                let _ = write.send(Message::Close(None)).await;
                return Err(e);
            }
            Err(_) => {
                let _ = write.send(Message::Close(None)).await;
                return Err(ChannelError::Protocol(format!(
                    "no confirmation for {} within {:?}",
                    channel, SUBSCRIBE_TIMEOUT
                )));
            }
        }
        info!("Subscribed to {}", channel);

        let (tx, subscription) = Subscription::channel(64);
        let channel = channel.to_string();

        tokio::spawn(async move {
            let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
            keepalive.tick().await;

            loop {
                tokio::select! {
                    msg = read.next() => {
                        let event = match msg {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<ServerMessage>(&text) {
                                    Ok(message) => match message.msg_type.as_str() {
                                        msg_types::NOTIFICATION => Some(Ok(message.payload)),
                                        msg_types::ERROR => Some(Err(server_error(message.payload))),
                                        msg_types::PING => {
                                            let pong = serde_json::to_string(&ClientMessage::empty(msg_types::PONG))
                                                .unwrap_or_default();
                                            if let Err(e) = write.send(Message::Text(pong.into())).await {
                                                Some(Err(ChannelError::Protocol(e.to_string())))
                                            } else {
                                                None
                                            }
                                        }
                                        other => {
                                            debug!("Ignoring {} message on {}", other, channel);
                                            None
                                        }
                                    },
                                    Err(e) => {
                                        warn!("Failed to parse channel message: {} - {}", e, text.as_str());
                                        None
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                match write.send(Message::Pong(data)).await {
                                    Ok(()) => None,
                                    Err(e) => Some(Err(ChannelError::Protocol(e.to_string()))),
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                info!("Notification channel {} closed by server", channel);
                                Some(Err(ChannelError::Closed))
                            }
                            Some(Err(e)) => Some(Err(ChannelError::Protocol(e.to_string()))),
                            Some(Ok(_)) => None,
                        };

                        if let Some(event) = event {
                            let fatal = event.is_err();
                            if tx.send(event).await.is_err() || fatal {
                                break;
                            }
                        }
                    }
                    _ = keepalive.tick() => {
                        let ping = serde_json::to_string(&ClientMessage::empty(msg_types::PING))
                            .unwrap_or_default();
                        if let Err(e) = write.send(Message::Text(ping.into())).await {
                            let _ = tx.send(Err(ChannelError::Protocol(e.to_string()))).await;
                            break;
                        }
                    }
                    _ = tx.closed() => {
                        debug!("Subscription to {} dropped, closing connection", channel);
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        });

        Ok(subscription)
    }
}
