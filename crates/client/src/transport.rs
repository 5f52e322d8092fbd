//! Client transports
//!
//! A [`Channel`] is one open connection to the server, normalized so the
//! controller doesn't care which transport carries it: decoded JSON
//! messages come in on `inbound`, and text goes out on `outbound` when the
//! transport can send at all.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{SinkExt, StreamExt};
use reqwest::{header::ACCEPT, StatusCode};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
};
use url::Url;

use crate::error::ClientError;

/// Which transport a channel uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// WebSocket, bidirectional
    Primary,
    /// Server-Sent Events, receive only
    Fallback,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Primary => "websocket",
            TransportKind::Fallback => "sse",
        }
    }

    pub fn can_send(&self) -> bool {
        matches!(self, TransportKind::Primary)
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport to try after `previous` failed; `None` starts from the top
pub fn next_transport(previous: Option<TransportKind>) -> Option<TransportKind> {
    match previous {
        None => Some(TransportKind::Primary),
        Some(TransportKind::Primary) => Some(TransportKind::Fallback),
        Some(TransportKind::Fallback) => None,
    }
}

/// One open connection. Dropping it stops its I/O task.
pub struct Channel {
    pub kind: TransportKind,
    pub outbound: Option<mpsc::UnboundedSender<String>>,
    pub inbound: mpsc::UnboundedReceiver<Value>,
    io: Option<JoinHandle<()>>,
}

impl Channel {
    pub fn new(
        kind: TransportKind,
        outbound: Option<mpsc::UnboundedSender<String>>,
        inbound: mpsc::UnboundedReceiver<Value>,
    ) -> Self {
        Self {
            kind,
            outbound,
            inbound,
            io: None,
        }
    }

    /// Attach the task pumping this channel's I/O
    pub fn with_io(mut self, io: JoinHandle<()>) -> Self {
        self.io = Some(io);
        self
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if let Some(io) = self.io.take() {
            io.abort();
        }
    }
}

/// Opens transports to the server
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, kind: TransportKind, token: &str) -> Result<Channel, ClientError>;
}

/// Server base URL and the realtime endpoints derived from it
#[derive(Debug, Clone)]
pub struct Endpoint {
    base: Url,
}

impl Endpoint {
    /// Parse an `http(s)://` base URL
    pub fn parse(base: &str) -> Result<Self, ClientError> {
        let base = Url::parse(base)?;
        match base.scheme() {
            "http" | "https" => Ok(Self { base }),
            other => Err(ClientError::InvalidUrl(format!("unsupported scheme {other}"))),
        }
    }

    fn with_path(&self, path: &str, token: &str) -> Url {
        let mut url = self.base.clone();
        let joined = format!("{}{}", self.base.path().trim_end_matches('/'), path);
        url.set_path(&joined);
        url.set_fragment(None);
        url.query_pairs_mut().clear().append_pair("token", token);
        url
    }

    /// `ws(s)://…/api/ws?token=…`
    pub fn websocket_url(&self, token: &str) -> Result<Url, ClientError> {
        let mut url = self.with_path("/api/ws", token);
        let scheme = if self.base.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::InvalidUrl(format!("cannot use {scheme} for {}", self.base)))?;
        Ok(url)
    }

    /// `http(s)://…/api/sse?token=…`
    pub fn sse_url(&self, token: &str) -> Url {
        self.with_path("/api/sse", token)
    }
}

/// Connector for a real server: WebSocket primary, SSE fallback
#[derive(Debug, Clone)]
pub struct ServerConnector {
    endpoint: Endpoint,
    http: reqwest::Client,
}

impl ServerConnector {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            http: reqwest::Client::new(),
        }
    }

    async fn open_websocket(&self, token: &str) -> Result<Channel, ClientError> {
        let url = self.endpoint.websocket_url(token)?;
        tracing::debug!(path = %url.path(), "Opening WebSocket");

        let (ws, _) = connect_async(url.as_str()).await.map_err(|e| match e {
            WsError::Http(res) if res.status().as_u16() == 401 => ClientError::Unauthorized,
            other => ClientError::WebSocket(other),
        })?;

        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Value>();

        let io = tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = out_rx.recv() => match outgoing {
                        Some(text) => {
                            if sink.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            let _ = sink.close().await;
                            break;
                        }
                    },
                    incoming = stream.next() => match incoming {
                        Some(Ok(Message::Text(text))) => match serde_json::from_str::<Value>(text.as_str()) {
                            Ok(value) => {
                                if in_tx.send(value).is_err() {
                                    break;
                                }
                            }
                            Err(e) => tracing::warn!(error = %e, "Failed to parse WebSocket message"),
                        },
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "WebSocket read failed");
                            break;
                        }
                    },
                }
            }
        });

        Ok(Channel::new(TransportKind::Primary, Some(out_tx), in_rx).with_io(io))
    }

    async fn open_sse(&self, token: &str) -> Result<Channel, ClientError> {
        let url = self.endpoint.sse_url(token);
        tracing::debug!(path = %url.path(), "Opening SSE stream");

        let res = self
            .http
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;

        match res.status() {
            StatusCode::UNAUTHORIZED => return Err(ClientError::Unauthorized),
            status if !status.is_success() => return Err(ClientError::Status(status.as_u16())),
            _ => {}
        }

        let (in_tx, in_rx) = mpsc::unbounded_channel::<Value>();
        let mut events = res.bytes_stream().eventsource();

        let io = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                match event {
                    Ok(event) => match serde_json::from_str::<Value>(&event.data) {
                        Ok(value) => {
                            if in_tx.send(value).is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "Failed to parse SSE message"),
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "SSE stream failed");
                        break;
                    }
                }
            }
        });

        Ok(Channel::new(TransportKind::Fallback, None, in_rx).with_io(io))
    }
}

#[async_trait]
impl Connector for ServerConnector {
    async fn open(&self, kind: TransportKind, token: &str) -> Result<Channel, ClientError> {
        match kind {
            TransportKind::Primary => self.open_websocket(token).await,
            TransportKind::Fallback => self.open_sse(token).await,
        }
    }
}
