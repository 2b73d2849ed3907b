//! WebSocket client for the push-based realtime document store.
//!
//! Each subscription opens its own connection, sends one `subscribe` frame
//! describing the query, then receives full-collection snapshots as JSON text
//! frames until the server closes the stream or reports an error.

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, trace, warn};

use crate::{ApiError, RawDocument, SubscriptionKey};

/// One full-collection snapshot as delivered by the provider.
#[derive(Debug, Clone, Default)]
pub struct RawSnapshot {
    pub documents: Vec<RawDocument>,
}

/// Ordered stream of snapshots for one subscription. An `Err` item is terminal.
pub type SnapshotStream = BoxStream<'static, Result<RawSnapshot, ApiError>>;

/// Push-based realtime backend.
#[async_trait]
pub trait RealtimeChannel: Send + Sync + 'static {
    /// Open a live query. Resolves once the provider accepted the subscription.
    async fn open(&self, key: &SubscriptionKey) -> Result<SnapshotStream, ApiError>;
}

/// Realtime channel over a WebSocket endpoint.
pub struct WsChannel {
    url: String,
    token: Option<String>,
}

impl WsChannel {
    /// Create a channel for the given WebSocket URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
        }
    }

    /// Attach a bearer token to the connection handshake.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RealtimeChannel for WsChannel {
    async fn open(&self, key: &SubscriptionKey) -> Result<SnapshotStream, ApiError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ApiError::WebSocket(format!("invalid URL: {}", e)))?;

        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ApiError::WebSocket(format!("invalid token: {}", e)))?;
            request.headers_mut().insert("Authorization", value);
        }

        let (mut ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| ApiError::WebSocket(format!("connection failed: {}", e)))?;

        let mut frame = key.to_wire();
        if let Some(map) = frame.as_object_mut() {
            map.insert("type".to_string(), "subscribe".into());
        }
        ws_stream
            .send(Message::Text(frame.to_string()))
            .await
            .map_err(|e| ApiError::WebSocket(format!("subscribe failed: {}", e)))?;

        info!(key = %key, "realtime subscription opened");

        let key_label = key.to_string();
        let snapshots = stream::unfold(Some(ws_stream), move |state| {
            let key_label = key_label.clone();
            async move {
                let mut ws_stream = state?;
                loop {
                    match ws_stream.next().await {
                        Some(Ok(Message::Text(text))) => match parse_frame(&text) {
                            Ok(Some(snapshot)) => return Some((Ok(snapshot), Some(ws_stream))),
                            Ok(None) => continue,
                            // Terminal: yield the error and end the stream.
                            Err(e) => return Some((Err(e), None)),
                        },
                        Some(Ok(Message::Ping(_))) => {
                            // tungstenite auto-responds to pings
                            trace!("received ping");
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!(key = %key_label, "realtime connection closed by server");
                            return Some((
                                Err(ApiError::WebSocket("connection closed".to_string())),
                                None,
                            ));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(key = %key_label, error = %e, "realtime read error");
                            return Some((
                                Err(ApiError::WebSocket(format!("read error: {}", e))),
                                None,
                            ));
                        }
                        None => {
                            return Some((
                                Err(ApiError::WebSocket("stream ended".to_string())),
                                None,
                            ));
                        }
                    }
                }
            }
        });

        Ok(snapshots.boxed())
    }
}

/// Frames sent by the realtime provider.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Frame {
    /// Full collection snapshot.
    Snapshot {
        #[serde(default)]
        documents: Vec<serde_json::Value>,
    },
    /// Subscription acknowledged.
    Subscribed,
    /// Subscription rejected or terminated.
    Error {
        #[serde(default)]
        message: String,
    },
}

/// Parse one text frame. `Ok(None)` means the frame carries no snapshot.
fn parse_frame(text: &str) -> Result<Option<RawSnapshot>, ApiError> {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            // Unknown frame types are skipped, not fatal.
            debug!(error = %e, "ignoring unrecognized realtime frame");
            return Ok(None);
        }
    };

    match frame {
        Frame::Snapshot { documents } => Ok(Some(RawSnapshot {
            documents: documents.into_iter().map(RawDocument::from_value).collect(),
        })),
        Frame::Subscribed => {
            trace!("subscription acknowledged");
            Ok(None)
        }
        Frame::Error { message } => Err(ApiError::Subscription(message)),
    }
}
