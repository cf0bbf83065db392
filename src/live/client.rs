//! Live API connection
//!
//! The session only sees the [`Connector`], [`LiveSink`] and [`LiveSource`]
//! traits; [`GeminiConnector`] is the websocket implementation.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::messages::{RealtimeInputMessage, ServerEvent, SetupMessage, parse_server_message};
use crate::voice::AudioChunk;
use crate::{Error, Result};

/// Default Live API websocket endpoint
pub const DEFAULT_LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent";

/// Outbound half of a live connection
#[async_trait]
pub trait LiveSink: Send {
    /// Send one JSON text frame
    ///
    /// # Errors
    ///
    /// Returns error if the connection is gone
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Close the connection
    ///
    /// # Errors
    ///
    /// Returns error if the close frame cannot be sent
    async fn close(&mut self) -> Result<()>;
}

/// Inbound half of a live connection
#[async_trait]
pub trait LiveSource: Send {
    /// Next JSON message, or `None` once the server has closed the connection
    async fn next_text(&mut self) -> Option<Result<String>>;
}

/// Opens live connections
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and split into sink and source
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the endpoint is unreachable
    async fn connect(&self) -> Result<(Box<dyn LiveSink>, Box<dyn LiveSource>)>;
}

/// Typed sender over a [`LiveSink`]
pub struct LiveSender {
    sink: Box<dyn LiveSink>,
    frames_sent: u64,
}

impl LiveSender {
    /// Wrap a sink
    #[must_use]
    pub fn new(sink: Box<dyn LiveSink>) -> Self {
        Self {
            sink,
            frames_sent: 0,
        }
    }

    /// Send the model-selection frame
    ///
    /// # Errors
    ///
    /// Returns error if the frame cannot be sent
    pub async fn send_setup(&mut self, model: &str) -> Result<()> {
        let json = SetupMessage::new(model).to_json()?;
        tracing::debug!(model, "sending setup");
        self.sink.send_text(json).await
    }

    /// Send one microphone frame
    ///
    /// # Errors
    ///
    /// Returns error if the frame cannot be sent
    pub async fn send_audio(&mut self, frame: &AudioChunk) -> Result<()> {
        let json = RealtimeInputMessage::from_pcm(frame.as_bytes()).to_json()?;
        self.sink.send_text(json).await?;
        self.frames_sent += 1;
        tracing::trace!(bytes = frame.len(), "sent audio frame");
        Ok(())
    }

    /// Frames sent so far
    #[must_use]
    pub const fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Close the connection, logging failures
    pub async fn close(mut self) {
        if let Err(e) = self.sink.close().await {
            tracing::debug!(error = %e, "error closing live connection");
        }
        tracing::debug!(frames_sent = self.frames_sent, "live connection closed");
    }
}

/// Typed event reader over a [`LiveSource`]
pub struct LiveReceiver {
    source: Box<dyn LiveSource>,
    pending: VecDeque<ServerEvent>,
}

impl LiveReceiver {
    /// Wrap a source
    #[must_use]
    pub fn new(source: Box<dyn LiveSource>) -> Self {
        Self {
            source,
            pending: VecDeque::new(),
        }
    }

    /// Next event in arrival order, or `None` once the connection has closed
    ///
    /// Messages that carry no recognizable event are skipped. A message that
    /// fails to decode yields one `Err` and reading may continue.
    pub async fn next_event(&mut self) -> Option<Result<ServerEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }

            let text = match self.source.next_text().await? {
                Ok(text) => text,
                Err(e) => return Some(Err(e)),
            };

            match parse_server_message(&text) {
                Ok(events) if events.is_empty() => {
                    tracing::debug!(bytes = text.len(), "ignoring unrecognized message");
                }
                Ok(events) => self.pending.extend(events),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Send the setup frame and wait for its acknowledgment
///
/// # Errors
///
/// Returns [`Error::Handshake`] if no acknowledgment arrives within
/// `timeout`, the first event is anything other than an acknowledgment,
/// or the connection closes first
pub async fn handshake(
    sender: &mut LiveSender,
    receiver: &mut LiveReceiver,
    model: &str,
    timeout: Duration,
) -> Result<()> {
    sender.send_setup(model).await?;

    let first = tokio::time::timeout(timeout, receiver.next_event())
        .await
        .map_err(|_| {
            Error::Handshake(format!("no setup acknowledgment within {timeout:?}"))
        })?;

    match first {
        Some(Ok(ServerEvent::SetupAck)) => {
            tracing::debug!(model, "setup acknowledged");
            Ok(())
        }
        Some(Ok(ServerEvent::Error(reason))) => {
            Err(Error::Handshake(format!("setup rejected: {reason}")))
        }
        Some(Ok(other)) => Err(Error::Handshake(format!(
            "expected setup acknowledgment, got {}",
            other.kind()
        ))),
        Some(Err(e)) => Err(Error::Handshake(format!("invalid setup response: {e}"))),
        None => Err(Error::Handshake(
            "connection closed before setup acknowledgment".to_string(),
        )),
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to the Gemini Live API over a secure websocket
pub struct GeminiConnector {
    endpoint: Url,
    api_key: SecretString,
}

impl GeminiConnector {
    /// Connector for `endpoint`, authenticated with `api_key`
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint is not a websocket URL
    pub fn new(endpoint: &str, api_key: SecretString) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| Error::Config(format!("invalid live endpoint {endpoint}: {e}")))?;
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(Error::Config(format!(
                "live endpoint must use ws or wss, got {}",
                endpoint.scheme()
            )));
        }
        Ok(Self { endpoint, api_key })
    }

    fn authenticated_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("key", self.api_key.expose_secret());
        url
    }
}

#[async_trait]
impl Connector for GeminiConnector {
    async fn connect(&self) -> Result<(Box<dyn LiveSink>, Box<dyn LiveSource>)> {
        let host = self.endpoint.host_str().unwrap_or_default().to_string();
        tracing::debug!(host, "connecting to live endpoint");

        let (ws_stream, _response) = connect_async(self.authenticated_url().as_str())
            .await
            .map_err(|e| Error::Connection(format!("failed to connect to {host}: {e}")))?;

        tracing::info!(host, "connected to live endpoint");

        let (sink, source) = ws_stream.split();
        Ok((Box::new(WsSink(sink)), Box::new(WsSource(source))))
    }
}

struct WsSink(SplitSink<WsStream, Message>);

#[async_trait]
impl LiveSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.0.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.0.send(Message::Close(None)).await?;
        self.0.close().await?;
        Ok(())
    }
}

struct WsSource(SplitStream<WsStream>);

#[async_trait]
impl LiveSource for WsSource {
    async fn next_text(&mut self) -> Option<Result<String>> {
        loop {
            let message = match self.0.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(e.into())),
            };

            match message {
                Message::Text(text) => return Some(Ok(text.as_str().to_owned())),
                Message::Binary(data) => {
                    return Some(
                        String::from_utf8(data.to_vec())
                            .map_err(|e| Error::Protocol(format!("binary frame is not UTF-8: {e}"))),
                    );
                }
                Message::Close(frame) => {
                    tracing::info!(?frame, "live endpoint closed the connection");
                    return None;
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }
}
