//! External collaborator interfaces
//!
//! The platform around this core owns user profiles and game history. The
//! core reaches them through these seams: the gateway resolves identities
//! through a [`UserDirectory`], and finished games are handed to a
//! [`ResultStore`] after the session has been removed from the registry
//! and its lock released.

use crate::session::PlayerRef;
use log::info;
use shared::MatchResult;
use std::collections::HashMap;
use std::sync::Mutex;

/// User lookup surface of the platform's user service. `register` feeds
/// identities in as the authentication collaborator vouches for them at
/// connection time.
pub trait UserDirectory: Send + Sync {
    fn lookup_by_id(&self, id: u64) -> Option<PlayerRef>;
    fn lookup_by_name(&self, name: &str) -> Option<PlayerRef>;
    fn register(&self, player: PlayerRef);
}

/// Persistence sink for finished games.
pub trait ResultStore: Send + Sync {
    fn record_finished_game(&self, result: &MatchResult);
}

/// Directory backed by a process-local map. Stands in for the platform's
/// user service in the standalone binary and in tests.
#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: Mutex<HashMap<u64, PlayerRef>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UserDirectory for InMemoryUserDirectory {
    fn lookup_by_id(&self, id: u64) -> Option<PlayerRef> {
        let users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        users.get(&id).cloned()
    }

    fn lookup_by_name(&self, name: &str) -> Option<PlayerRef> {
        let users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        users.values().find(|p| p.name == name).cloned()
    }

    fn register(&self, player: PlayerRef) {
        let mut users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        users.insert(player.id, player);
    }
}

/// Result store that keeps everything in memory. Tests assert against
/// `recorded()`.
#[derive(Default)]
pub struct InMemoryResultStore {
    results: Mutex<Vec<MatchResult>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<MatchResult> {
        let results = self.results.lock().unwrap_or_else(|e| e.into_inner());
        results.clone()
    }
}

impl ResultStore for InMemoryResultStore {
    fn record_finished_game(&self, result: &MatchResult) {
        let mut results = self.results.lock().unwrap_or_else(|e| e.into_inner());
        results.push(result.clone());
    }
}

/// Result store for the standalone binary: writes the outcome to the log
/// until a real persistence backend is wired in.
pub struct LoggingResultStore;

impl ResultStore for LoggingResultStore {
    fn record_finished_game(&self, result: &MatchResult) {
        info!(
            "recorded game {}: {} {} - {} {}{}",
            result.room,
            result.left.name,
            result.left.points,
            result.right.points,
            result.right.name,
            if result.forfeit { " (forfeit)" } else { "" }
        );
    }
}
