//! Per-connection context tracking for the realtime gateway
//!
//! This module keeps the server-side state for each live connection:
//! - Connection lifecycle (connect, disconnect, timeout)
//! - The explicit per-connection context: verified player identity,
//!   network address, last activity, and any pending invite
//! - Capacity enforcement and address-to-player resolution
//!
//! Identity arrives once at connection time from the authentication
//! collaborator and is trusted thereafter; nothing else is ever stashed on
//! a connection.

use crate::session::PlayerRef;
use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Connections that stay silent this long are swept as disconnected.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything the gateway knows about one live connection.
#[derive(Debug)]
pub struct ConnContext {
    /// Verified identity bound to this connection.
    pub player: PlayerRef,
    /// Network address for sending responses.
    pub addr: SocketAddr,
    /// Last time any packet arrived from this connection.
    pub last_seen: Instant,
    /// Outstanding challenge from another player, if any.
    pub pending_invite: Option<PlayerRef>,
}

impl ConnContext {
    pub fn new(player: PlayerRef, addr: SocketAddr) -> Self {
        Self {
            player,
            addr,
            last_seen: Instant::now(),
            pending_invite: None,
        }
    }

    /// Marks the connection as recently active.
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Tracks all live connections, keyed by player id.
pub struct ConnectionManager {
    connections: HashMap<u64, ConnContext>,
    max_connections: usize,
}

impl ConnectionManager {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: HashMap::new(),
            max_connections,
        }
    }

    /// Binds a player identity to an address. An existing connection from
    /// the same address or for the same player is replaced, so a reconnect
    /// never counts against capacity. Returns false when at capacity.
    pub fn register(&mut self, player: PlayerRef, addr: SocketAddr) -> bool {
        if let Some(existing) = self.find_by_addr(addr) {
            if existing != player.id {
                info!("replacing connection for player {} at {}", existing, addr);
                self.connections.remove(&existing);
            }
        }

        if !self.connections.contains_key(&player.id)
            && self.connections.len() >= self.max_connections
        {
            return false;
        }

        info!("player {} ({}) connected from {}", player.id, player.name, addr);
        self.connections.insert(player.id, ConnContext::new(player, addr));
        true
    }

    /// Drops a connection. Returns its context if it existed.
    pub fn remove(&mut self, player_id: u64) -> Option<ConnContext> {
        let removed = self.connections.remove(&player_id);
        if removed.is_some() {
            info!("player {} disconnected", player_id);
        }
        removed
    }

    /// Resolves an incoming packet's source address to a player id.
    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<u64> {
        self.connections
            .iter()
            .find(|(_, conn)| conn.addr == addr)
            .map(|(id, _)| *id)
    }

    pub fn get(&self, player_id: u64) -> Option<&ConnContext> {
        self.connections.get(&player_id)
    }

    pub fn addr_of(&self, player_id: u64) -> Option<SocketAddr> {
        self.connections.get(&player_id).map(|conn| conn.addr)
    }

    /// Addresses for a set of players, skipping any that are offline.
    pub fn addrs_of(&self, player_ids: &[u64]) -> Vec<SocketAddr> {
        player_ids
            .iter()
            .filter_map(|id| self.addr_of(*id))
            .collect()
    }

    pub fn touch(&mut self, player_id: u64) {
        if let Some(conn) = self.connections.get_mut(&player_id) {
            conn.touch();
        }
    }

    /// Parks an invite on the target's connection. Returns false when the
    /// target is offline.
    pub fn set_pending_invite(&mut self, target_id: u64, from: PlayerRef) -> bool {
        match self.connections.get_mut(&target_id) {
            Some(conn) => {
                conn.pending_invite = Some(from);
                true
            }
            None => false,
        }
    }

    /// Takes the pending invite off a connection, if any.
    pub fn take_pending_invite(&mut self, player_id: u64) -> Option<PlayerRef> {
        self.connections
            .get_mut(&player_id)
            .and_then(|conn| conn.pending_invite.take())
    }

    /// Removes connections that went silent and returns their player ids
    /// for cleanup in the matchmaking and session layers.
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<u64> {
        let timed_out: Vec<u64> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        for player_id in &timed_out {
            self.remove(*player_id);
        }

        timed_out
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
