//! SMS Dashboard realtime client
//!
//! Keeps a dashboard connected to the server's realtime feed. WebSocket is
//! tried first; if it can't be opened within the connect timeout the client
//! falls back to Server-Sent Events, and if both fail it retries with capped
//! exponential backoff until its attempts run out.
//!
//! ```no_run
//! # async fn demo() -> Result<(), smsdash_client::ClientError> {
//! use smsdash_client::RealtimeClient;
//!
//! let client = RealtimeClient::new("https://sms.example.com")?;
//! let _sub = client.on("messages:bulk_created", |msg| {
//!     println!("new messages: {}", msg["data"]);
//!     Ok(())
//! });
//! client.connect("session-token")?;
//! # Ok(())
//! # }
//! ```

pub mod controller;
pub mod dispatch;
pub mod error;
pub mod policy;
pub mod transport;

pub use controller::{ConnectionState, RealtimeClient, SendOutcome};
pub use dispatch::{Listener, Listeners, Subscription, WILDCARD};
pub use error::ClientError;
pub use policy::ReconnectPolicy;
pub use transport::{next_transport, Channel, Connector, Endpoint, ServerConnector, TransportKind};
