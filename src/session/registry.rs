//! Endpoint-keyed connection bookkeeping.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::SocketAddr;

use tracing::info;

use super::Connection;

/// Owns every live connection, keyed by remote address. Client ids
/// are handed out monotonically from 1 and never reused.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<SocketAddr, Connection>,
    addr_by_id: HashMap<i32, SocketAddr>,
    next_client_id: i32,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
            addr_by_id: HashMap::new(),
            next_client_id: 0,
        }
    }

    /// Looks up the connection for `addr`, creating one with a fresh
    /// client id if the endpoint is unknown.
    pub fn get_or_create(&mut self, addr: SocketAddr) -> &mut Connection {
        match self.connections.entry(addr) {
            Entry::Occupied(occupied) => occupied.into_mut(),
            Entry::Vacant(vacant) => {
                self.next_client_id += 1;
                let client_id = self.next_client_id;
                info!(client_id, %addr, "new connection");
                self.addr_by_id.insert(client_id, addr);
                vacant.insert(Connection::new(client_id, addr))
            }
        }
    }

    pub fn get(&self, addr: &SocketAddr) -> Option<&Connection> {
        self.connections.get(addr)
    }

    pub fn get_mut(&mut self, addr: &SocketAddr) -> Option<&mut Connection> {
        self.connections.get_mut(addr)
    }

    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.connections.contains_key(addr)
    }

    pub fn addr_of(&self, client_id: i32) -> Option<SocketAddr> {
        self.addr_by_id.get(&client_id).copied()
    }

    pub fn by_client_id(&self, client_id: i32) -> Option<&Connection> {
        self.addr_of(client_id)
            .and_then(|addr| self.connections.get(&addr))
    }

    pub fn by_client_id_mut(&mut self, client_id: i32) -> Option<&mut Connection> {
        let addr = self.addr_of(client_id)?;
        self.connections.get_mut(&addr)
    }

    /// Removes the connection and returns it for final bookkeeping
    /// (the caller still has to detach it from its room).
    pub fn remove(&mut self, addr: &SocketAddr) -> Option<Connection> {
        let conn = self.connections.remove(addr)?;
        self.addr_by_id.remove(&conn.client_id);
        info!(client_id = conn.client_id, %addr, "connection removed");
        Some(conn)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.connections.values_mut()
    }

    pub fn addrs(&self) -> Vec<SocketAddr> {
        self.connections.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
