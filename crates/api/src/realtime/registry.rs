//! Connection registry
//!
//! The room owns exactly one registry and is the only caller of it.

use std::collections::HashMap;

use uuid::Uuid;

use super::connection::Connection;

/// Storage for the room's live connections, keyed by session ID
pub trait Registry: Send + 'static {
    /// Insert a connection, returning any previous entry with the same session ID
    fn insert(&mut self, conn: Connection) -> Option<Connection>;

    /// Remove and return a connection
    fn remove(&mut self, session_id: &Uuid) -> Option<Connection>;

    fn get(&self, session_id: &Uuid) -> Option<&Connection>;

    fn get_mut(&mut self, session_id: &Uuid) -> Option<&mut Connection>;

    /// Iterate over all registered connections in unspecified order
    fn connections(&self) -> Box<dyn Iterator<Item = &Connection> + '_>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local registry backed by a `HashMap`
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    connections: HashMap<Uuid, Connection>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Registry for MemoryRegistry {
    fn insert(&mut self, conn: Connection) -> Option<Connection> {
        self.connections.insert(conn.session_id, conn)
    }

    fn remove(&mut self, session_id: &Uuid) -> Option<Connection> {
        self.connections.remove(session_id)
    }

    fn get(&self, session_id: &Uuid) -> Option<&Connection> {
        self.connections.get(session_id)
    }

    fn get_mut(&mut self, session_id: &Uuid) -> Option<&mut Connection> {
        self.connections.get_mut(session_id)
    }

    fn connections(&self) -> Box<dyn Iterator<Item = &Connection> + '_> {
        Box::new(self.connections.values())
    }

    fn len(&self) -> usize {
        self.connections.len()
    }
}
