//! Listener registry for incoming realtime messages

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;

/// Listener key that receives every message
pub const WILDCARD: &str = "*";

/// Callback invoked for each matching message. An `Err` is logged and does
/// not stop delivery to the remaining listeners.
pub type Listener = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

struct Entry {
    id: u64,
    event: String,
    listener: Listener,
}

#[derive(Default)]
struct Inner {
    next_id: AtomicU64,
    entries: Mutex<Vec<Entry>>,
}

/// Listeners keyed by message `type`
#[derive(Clone, Default)]
pub struct Listeners {
    inner: Arc<Inner>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for messages whose `type` is `event`, or every
    /// message when `event` is `*`
    pub fn add(&self, event: &str, listener: Listener) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut entries) = self.inner.entries.lock() {
            entries.push(Entry {
                id,
                event: event.to_string(),
                listener,
            });
        }
        Subscription {
            id,
            listeners: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `message` to exact-type listeners, then wildcard listeners,
    /// each group in registration order. Returns how many listeners ran.
    pub fn dispatch(&self, message: &Value) -> usize {
        let event = message.get("type").and_then(Value::as_str);

        // Snapshot so listeners can (un)subscribe while being called
        let targets: Vec<(String, Listener)> = match self.inner.entries.lock() {
            Ok(entries) => {
                let exact = entries
                    .iter()
                    .filter(|e| event.is_some_and(|t| t != WILDCARD && e.event == t));
                let wildcard = entries.iter().filter(|e| e.event == WILDCARD);
                exact
                    .chain(wildcard)
                    .map(|e| (e.event.clone(), Arc::clone(&e.listener)))
                    .collect()
            }
            Err(_) => return 0,
        };

        for (key, listener) in &targets {
            if let Err(e) = listener(message) {
                tracing::error!(
                    listener = %key,
                    message_type = event.unwrap_or("<none>"),
                    error = %e,
                    "Realtime listener failed"
                );
            }
        }

        targets.len()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle returned by [`Listeners::add`]
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    listeners: Weak<Inner>,
}

impl Subscription {
    /// Remove the listener. A no-op if the client is already gone.
    pub fn unsubscribe(self) {
        if let Some(inner) = self.listeners.upgrade() {
            if let Ok(mut entries) = inner.entries.lock() {
                entries.retain(|e| e.id != self.id);
            }
        }
    }
}
