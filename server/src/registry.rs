//! Session registry and matchmaking queue
//!
//! The registry exclusively owns session lifecycle: it is the only
//! component that inserts or removes rooms. Structural mutations (room
//! map, reverse index, wait queue) happen under one short-held lock, while
//! each session lives behind its own `Mutex` so the scheduler can advance
//! many sessions without serializing on a global lock and a slow tick
//! never blocks registry-wide lookups.

use crate::error::GameError;
use crate::session::{MatchSession, PlayerRef};
use log::info;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Shared handle to one session's exclusion domain.
pub type SessionHandle = Arc<Mutex<MatchSession>>;

/// FIFO holding area for anonymous matchmaking. Insertion order is
/// priority; a player appears at most once.
pub struct WaitQueue {
    entries: VecDeque<PlayerRef>,
    capacity: usize,
}

impl WaitQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, player_id: u64) -> bool {
        self.entries.iter().any(|p| p.id == player_id)
    }

    /// Appends the player and returns their queue position.
    pub fn push(&mut self, player: PlayerRef) -> Result<usize, GameError> {
        if self.contains(player.id) {
            return Err(GameError::AlreadyQueued);
        }
        if self.entries.len() >= self.capacity {
            return Err(GameError::QueueFull);
        }

        self.entries.push_back(player);
        Ok(self.entries.len())
    }

    /// Puts a player back at the head of the queue. Used when session
    /// creation for a popped pair fails and one half must keep priority.
    pub fn push_front(&mut self, player: PlayerRef) {
        if !self.contains(player.id) {
            self.entries.push_front(player);
        }
    }

    pub fn remove(&mut self, player_id: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|p| p.id != player_id);
        self.entries.len() != before
    }

    /// Pops the two oldest entries, or none. Never dequeues a single
    /// player: a lone entry keeps its place at the head.
    pub fn pop_pair(&mut self) -> Option<(PlayerRef, PlayerRef)> {
        if self.entries.len() < 2 {
            return None;
        }
        let first = self.entries.pop_front()?;
        let second = self.entries.pop_front()?;
        Some((first, second))
    }
}

struct SessionEntry {
    /// Cached player ids so deletion never has to take the session lock.
    players: [u64; 2],
    handle: SessionHandle,
}

struct RegistryInner {
    sessions: HashMap<String, SessionEntry>,
    room_by_player: HashMap<u64, String>,
    queue: WaitQueue,
}

/// Owner of all live sessions and the matchmaking queue.
pub struct SessionRegistry {
    inner: RwLock<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                sessions: HashMap::new(),
                room_by_player: HashMap::new(),
                queue: WaitQueue::new(queue_capacity),
            }),
        }
    }

    /// Registers a new Waiting session for the two players. `left` defends
    /// the left side. Players in the wait queue are absorbed out of it.
    pub async fn create_session(
        &self,
        room: String,
        title: String,
        left: PlayerRef,
        right: PlayerRef,
    ) -> Result<SessionHandle, GameError> {
        let mut inner = self.inner.write().await;

        if inner.sessions.contains_key(&room) {
            return Err(GameError::DuplicateRoom);
        }
        if inner.room_by_player.contains_key(&left.id)
            || inner.room_by_player.contains_key(&right.id)
        {
            return Err(GameError::AlreadyInSession);
        }

        inner.queue.remove(left.id);
        inner.queue.remove(right.id);

        let players = [left.id, right.id];
        let session = MatchSession::new(room.clone(), title, left, right);
        let handle: SessionHandle = Arc::new(Mutex::new(session));

        inner.room_by_player.insert(players[0], room.clone());
        inner.room_by_player.insert(players[1], room.clone());
        inner.sessions.insert(
            room.clone(),
            SessionEntry {
                players,
                handle: Arc::clone(&handle),
            },
        );

        info!(
            "room {}: session created for players {} and {}",
            room, players[0], players[1]
        );
        Ok(handle)
    }

    /// Like [`create_session`](Self::create_session), for the direct
    /// challenge path: rejects with `TargetBusy` when the invited player
    /// (`guest`) already has a room.
    pub async fn create_invite_session(
        &self,
        room: String,
        title: String,
        host: PlayerRef,
        guest: PlayerRef,
    ) -> Result<SessionHandle, GameError> {
        {
            let inner = self.inner.read().await;
            if inner.room_by_player.contains_key(&guest.id) {
                return Err(GameError::TargetBusy);
            }
        }

        self.create_session(room, title, host, guest).await
    }

    pub async fn get_by_room(&self, room: &str) -> Option<SessionHandle> {
        let inner = self.inner.read().await;
        inner.sessions.get(room).map(|e| Arc::clone(&e.handle))
    }

    pub async fn room_for_player(&self, player_id: u64) -> Option<String> {
        let inner = self.inner.read().await;
        inner.room_by_player.get(&player_id).cloned()
    }

    pub async fn contains_room(&self, room: &str) -> bool {
        let inner = self.inner.read().await;
        inner.sessions.contains_key(room)
    }

    /// Removes the session and both of its reverse-index entries. Returns
    /// the handle so an in-flight caller can finish with the state.
    pub async fn delete_by_room(&self, room: &str) -> Option<SessionHandle> {
        let mut inner = self.inner.write().await;
        let entry = inner.sessions.remove(room)?;

        for player_id in entry.players {
            inner.room_by_player.remove(&player_id);
        }

        info!("room {}: session removed", room);
        Some(entry.handle)
    }

    /// Adds the player to the wait queue. Returns their queue position.
    pub async fn enqueue(&self, player: PlayerRef) -> Result<usize, GameError> {
        let mut inner = self.inner.write().await;

        if inner.room_by_player.contains_key(&player.id) {
            return Err(GameError::AlreadyInSession);
        }

        let position = inner.queue.push(player.clone())?;
        info!(
            "player {} ({}) queued at position {}",
            player.id, player.name, position
        );
        Ok(position)
    }

    /// Removes the player from the wait queue. Returns false if they were
    /// not queued.
    pub async fn cancel_queue(&self, player_id: u64) -> bool {
        let mut inner = self.inner.write().await;
        inner.queue.remove(player_id)
    }

    /// Pops the two oldest waiting players, or none.
    pub async fn dequeue_pair(&self) -> Option<(PlayerRef, PlayerRef)> {
        let mut inner = self.inner.write().await;
        inner.queue.pop_pair()
    }

    /// Returns a queued player to the head of the queue.
    pub async fn requeue_front(&self, player: PlayerRef) {
        let mut inner = self.inner.write().await;
        inner.queue.push_front(player);
    }

    pub async fn queue_len(&self) -> usize {
        let inner = self.inner.read().await;
        inner.queue.len()
    }

    pub async fn session_count(&self) -> usize {
        let inner = self.inner.read().await;
        inner.sessions.len()
    }

    /// Snapshot of all live sessions, taken under a short read lock. The
    /// scheduler iterates this without holding the registry lock.
    pub async fn all_sessions(&self) -> Vec<(String, SessionHandle)> {
        let inner = self.inner.read().await;
        inner
            .sessions
            .iter()
            .map(|(room, entry)| (room.clone(), Arc::clone(&entry.handle)))
            .collect()
    }

    /// Samples room tokens until one is unused. Collisions are resolved by
    /// `create_session`'s `DuplicateRoom` check in any case.
    pub async fn generate_room_token(&self) -> String {
        let inner = self.inner.read().await;
        loop {
            let suffix: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(8)
                .map(char::from)
                .collect();
            let token = format!("room-{}", suffix);
            if !inner.sessions.contains_key(&token) {
                return token;
            }
        }
    }
}
