//! Reconnect controller
//!
//! [`RealtimeClient`] keeps one transport open to the server. Each
//! `connect` spawns a driver task that tries WebSocket, falls back to SSE,
//! and on failure or an unexpected close retries with capped exponential
//! backoff. `disconnect` aborts the driver, which drops any pending sleep
//! and the open channel with it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use smsdash_shared::{default_channels, ClientMessage};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::dispatch::{Listeners, Subscription};
use crate::error::ClientError;
use crate::policy::ReconnectPolicy;
use crate::transport::{next_transport, Channel, Connector, Endpoint, ServerConnector, TransportKind};

/// Where the client is in its connection lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    ConnectingPrimary,
    ConnectingFallback,
    Connected(TransportKind),
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// Retries used up; stays here until `connect` is called again
    Exhausted,
    /// The server rejected the token; retrying won't help
    Unauthorized,
}

/// Result of [`RealtimeClient::send`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Connected over a receive-only transport
    Unsupported,
    NotConnected,
}

/// Outbound side of the live transport
struct Link {
    kind: TransportKind,
    outbound: Option<mpsc::UnboundedSender<String>>,
}

struct Shared {
    state: watch::Sender<ConnectionState>,
    listeners: Listeners,
    link: Mutex<Option<Link>>,
    /// Bumped by every connect/disconnect; stale drivers can't touch state
    generation: AtomicU64,
    unsupported_sends: AtomicU64,
}

impl Shared {
    fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            state,
            listeners: Listeners::new(),
            link: Mutex::new(None),
            generation: AtomicU64::new(0),
            unsupported_sends: AtomicU64::new(0),
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Start a new generation and drop the live link. Holds the link lock so
    /// no `transition` from the old generation can land after it.
    fn invalidate(&self) -> u64 {
        match self.link.lock() {
            Ok(mut link) => {
                *link = None;
                self.generation.fetch_add(1, Ordering::SeqCst) + 1
            }
            Err(_) => self.generation.fetch_add(1, Ordering::SeqCst) + 1,
        }
    }

    fn transition(&self, generation: u64, state: ConnectionState) {
        let Ok(_link) = self.link.lock() else {
            return;
        };
        if self.is_current(generation) {
            tracing::debug!(state = ?state, "Realtime state change");
            self.state.send_replace(state);
        }
    }

    fn set_link(&self, generation: u64, link: Option<Link>) {
        if let Ok(mut current) = self.link.lock() {
            if self.is_current(generation) {
                *current = link;
            }
        }
    }
}

/// Realtime client with WebSocket primary, SSE fallback and backoff retry
pub struct RealtimeClient {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeClient {
    /// Client for the server at `base_url` (`http://` or `https://`)
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let connector = ServerConnector::new(Endpoint::parse(base_url)?);
        Ok(Self::with_connector(
            Arc::new(connector),
            ReconnectPolicy::default(),
        ))
    }

    pub fn with_connector(connector: Arc<dyn Connector>, policy: ReconnectPolicy) -> Self {
        Self {
            shared: Arc::new(Shared::new()),
            connector,
            policy,
            driver: Mutex::new(None),
        }
    }

    /// Start (or restart) connecting with `token`. Must be called from
    /// within a tokio runtime.
    pub fn connect(&self, token: &str) -> Result<(), ClientError> {
        if token.is_empty() {
            return Err(ClientError::MissingToken);
        }

        let generation = self.reset();
        let driver = Driver {
            shared: Arc::clone(&self.shared),
            connector: Arc::clone(&self.connector),
            policy: self.policy,
            token: token.to_string(),
            generation,
        };
        let handle = tokio::spawn(driver.run());

        if let Ok(mut slot) = self.driver.lock() {
            *slot = Some(handle);
        }
        Ok(())
    }

    /// Close the transport and cancel any pending reconnect
    pub fn disconnect(&self) {
        let generation = self.reset();
        self.shared.transition(generation, ConnectionState::Disconnected);
        tracing::info!("Realtime client disconnected");
    }

    /// Invalidate the running driver and release its transport
    fn reset(&self) -> u64 {
        let generation = self.shared.invalidate();
        if let Ok(mut slot) = self.driver.lock() {
            if let Some(driver) = slot.take() {
                driver.abort();
            }
        }
        generation
    }

    /// Send a JSON message to the server. Only the WebSocket transport can
    /// carry it; over SSE the message is dropped and counted.
    pub fn send(&self, message: &Value) -> SendOutcome {
        let Ok(link) = self.shared.link.lock() else {
            return SendOutcome::NotConnected;
        };

        match link.as_ref() {
            Some(Link {
                outbound: Some(tx), ..
            }) => {
                if tx.send(message.to_string()).is_ok() {
                    SendOutcome::Sent
                } else {
                    SendOutcome::NotConnected
                }
            }
            Some(Link { kind, outbound: None }) => {
                self.shared.unsupported_sends.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(transport = %kind, "Cannot send over a one-way transport");
                SendOutcome::Unsupported
            }
            None => SendOutcome::NotConnected,
        }
    }

    /// Listen for messages of one `type`, or `*` for all
    pub fn on<F>(&self, event: &str, listener: F) -> Subscription
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared.listeners.add(event, Arc::new(listener))
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.borrow().clone()
    }

    /// Receiver that observes every state change
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state(), ConnectionState::Connected(_))
    }

    pub fn connection_type(&self) -> Option<TransportKind> {
        match self.state() {
            ConnectionState::Connected(kind) => Some(kind),
            _ => None,
        }
    }

    /// Messages dropped because the live transport can't send
    pub fn unsupported_send_count(&self) -> u64 {
        self.shared.unsupported_sends.load(Ordering::Relaxed)
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.driver.lock() {
            if let Some(driver) = slot.take() {
                driver.abort();
            }
        }
    }
}

/// State owned by one connect cycle's background task
struct Driver {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    token: String,
    generation: u64,
}

impl Driver {
    async fn run(self) {
        let mut attempts: u32 = 0;

        loop {
            match self.establish().await {
                Ok(channel) => {
                    attempts = 0;
                    self.serve(channel).await;
                    tracing::warn!("Realtime transport closed unexpectedly");
                }
                Err(ClientError::Unauthorized) => {
                    tracing::error!("Realtime connection rejected: unauthorized");
                    self.shared.transition(self.generation, ConnectionState::Unauthorized);
                    return;
                }
                Err(e) => {
                    tracing::error!(error = %e, "All realtime transports failed");
                }
            }

            if !self.policy.allows_retry(attempts) {
                tracing::error!(attempts, "Max reconnection attempts reached");
                self.shared.transition(self.generation, ConnectionState::Exhausted);
                return;
            }

            attempts += 1;
            let delay = self.policy.delay_for(attempts);
            tracing::info!(attempt = attempts, delay_ms = delay.as_millis() as u64, "Reconnecting");
            self.shared.transition(
                self.generation,
                ConnectionState::ReconnectScheduled {
                    attempt: attempts,
                    delay,
                },
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Try each transport in order; an auth rejection stops the walk
    async fn establish(&self) -> Result<Channel, ClientError> {
        let mut previous = None;
        let mut last_error = ClientError::Status(0);

        while let Some(kind) = next_transport(previous) {
            let connecting = match kind {
                TransportKind::Primary => ConnectionState::ConnectingPrimary,
                TransportKind::Fallback => ConnectionState::ConnectingFallback,
            };
            self.shared.transition(self.generation, connecting);

            let opened = tokio::time::timeout(
                self.policy.connect_timeout,
                self.connector.open(kind, &self.token),
            )
            .await
            .unwrap_or(Err(ClientError::Timeout(self.policy.connect_timeout)));

            match opened {
                Ok(channel) => return Ok(channel),
                Err(ClientError::Unauthorized) => return Err(ClientError::Unauthorized),
                Err(e) => {
                    tracing::warn!(transport = %kind, error = %e, "Realtime transport failed");
                    last_error = e;
                }
            }
            previous = Some(kind);
        }

        Err(last_error)
    }

    /// Pump one open channel until it closes
    async fn serve(&self, mut channel: Channel) {
        let kind = channel.kind;
        self.shared.set_link(
            self.generation,
            Some(Link {
                kind,
                outbound: channel.outbound.clone(),
            }),
        );
        self.shared.transition(self.generation, ConnectionState::Connected(kind));
        tracing::info!(transport = %kind, "Realtime connected");

        if kind.can_send() {
            let subscribe = ClientMessage::Subscribe {
                channels: Some(default_channels()),
            };
            match serde_json::to_string(&subscribe) {
                Ok(text) => {
                    if let Some(tx) = &channel.outbound {
                        let _ = tx.send(text);
                    }
                }
                Err(e) => tracing::error!(error = %e, "Failed to serialize subscribe message"),
            }
        }

        while let Some(message) = channel.inbound.recv().await {
            self.shared.listeners.dispatch(&message);
        }

        self.shared.set_link(self.generation, None);
    }
}
