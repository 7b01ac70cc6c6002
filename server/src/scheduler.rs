//! Simulation scheduler
//!
//! Two independently cancellable periodic tasks run against the session
//! registry: a seconds-scale matchmaking tick that pairs waiting players,
//! and a frame-interval game tick that advances every playing session.
//! Both watch a shared shutdown signal so no timer outlives the process.
//!
//! The game tick takes each session's own lock only long enough to advance
//! it; registry mutation, persistence, and broadcasting all happen after
//! the lock is released.

use crate::collab::ResultStore;
use crate::gateway::Outbound;
use crate::registry::SessionRegistry;
use crate::session::TickOutcome;
use log::{error, info, warn};
use shared::{MatchResult, Packet, SessionSnapshot, Side};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Frame interval for the physics tick (about 60Hz).
pub const GAME_TICK_PERIOD: Duration = Duration::from_millis(16);
/// How often ready pairs are drained from the wait queue.
pub const MATCHMAKING_PERIOD: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub game_tick: Duration,
    pub matchmaking_tick: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            game_tick: GAME_TICK_PERIOD,
            matchmaking_tick: MATCHMAKING_PERIOD,
        }
    }
}

/// Handle to the two running periodic tasks.
pub struct Scheduler {
    shutdown_tx: watch::Sender<bool>,
    matchmaking_task: JoinHandle<()>,
    game_task: JoinHandle<()>,
}

impl Scheduler {
    pub fn spawn(
        registry: Arc<SessionRegistry>,
        results: Arc<dyn ResultStore>,
        outbound: mpsc::UnboundedSender<Outbound>,
        config: SchedulerConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let matchmaking_task = tokio::spawn(run_matchmaking_loop(
            Arc::clone(&registry),
            outbound.clone(),
            config.matchmaking_tick,
            shutdown_rx.clone(),
        ));

        let game_task = tokio::spawn(run_game_loop(
            registry,
            results,
            outbound,
            config.game_tick,
            shutdown_rx,
        ));

        info!(
            "scheduler started (game tick {:?}, matchmaking tick {:?})",
            config.game_tick, config.matchmaking_tick
        );

        Self {
            shutdown_tx,
            matchmaking_task,
            game_task,
        }
    }

    /// Signals both periodic tasks and waits for them to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);

        if let Err(e) = self.matchmaking_task.await {
            error!("matchmaking task panicked: {}", e);
        }
        if let Err(e) = self.game_task.await {
            error!("game tick task panicked: {}", e);
        }

        info!("scheduler stopped");
    }
}

async fn run_matchmaking_loop(
    registry: Arc<SessionRegistry>,
    outbound: mpsc::UnboundedSender<Outbound>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = timer.tick() => {
                pair_waiting_players(&registry, &outbound).await;
            }
            _ = shutdown.changed() => break,
        }
    }
}

/// Drains ready pairs from the wait queue into fresh sessions and notifies
/// both players.
async fn pair_waiting_players(
    registry: &SessionRegistry,
    outbound: &mpsc::UnboundedSender<Outbound>,
) {
    while let Some((first, second)) = registry.dequeue_pair().await {
        let room = registry.generate_room_token().await;
        let title = format!("{} vs {}", first.name, second.name);

        match registry
            .create_session(room.clone(), title.clone(), first.clone(), second.clone())
            .await
        {
            Ok(_) => {
                info!(
                    "matched players {} and {} into {}",
                    first.id, second.id, room
                );
                let _ = outbound.send(Outbound::ToPlayer {
                    player_id: first.id,
                    packet: Packet::MatchFound {
                        room: room.clone(),
                        title: title.clone(),
                        side: Side::Left,
                        opponent: second.name.clone(),
                    },
                });
                let _ = outbound.send(Outbound::ToPlayer {
                    player_id: second.id,
                    packet: Packet::MatchFound {
                        room,
                        title,
                        side: Side::Right,
                        opponent: first.name.clone(),
                    },
                });
            }
            Err(e) => {
                // One of the pair got a room through an invite between the
                // pop and the insert. Whoever is still free keeps priority.
                warn!("could not create session for matched pair: {}", e);
                for player in [second, first] {
                    if registry.room_for_player(player.id).await.is_none() {
                        registry.requeue_front(player).await;
                    }
                }
            }
        }
    }
}

async fn run_game_loop(
    registry: Arc<SessionRegistry>,
    results: Arc<dyn ResultStore>,
    outbound: mpsc::UnboundedSender<Outbound>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = timer.tick() => {
                advance_sessions(&registry, results.as_ref(), &outbound).await;
            }
            _ = shutdown.changed() => break,
        }
    }
}

enum TickAction {
    Skip,
    Broadcast(SessionSnapshot, [u64; 2]),
    Finish(MatchResult, [u64; 2]),
}

/// Advances every live session by one tick. Sessions are independent, so
/// each is advanced under its own lock; no session observes another's
/// mutation within a tick.
async fn advance_sessions(
    registry: &SessionRegistry,
    results: &dyn ResultStore,
    outbound: &mpsc::UnboundedSender<Outbound>,
) {
    for (room, handle) in registry.all_sessions().await {
        let action = {
            let mut session = handle.lock().await;
            match session.tick() {
                TickOutcome::Idle => TickAction::Skip,
                TickOutcome::Running => {
                    TickAction::Broadcast(session.snapshot(), session.player_ids())
                }
                TickOutcome::Ended(result) => TickAction::Finish(result, session.player_ids()),
            }
        };

        match action {
            TickAction::Skip => {}
            TickAction::Finish(result, players) => {
                registry.delete_by_room(&room).await;
                // Persistence happens only after the room is gone and the
                // session lock is released.
                results.record_finished_game(&result);
                let _ = outbound.send(Outbound::ToPlayers {
                    player_ids: players.to_vec(),
                    packet: Packet::SessionEnded { result },
                });
            }
            TickAction::Broadcast(snapshot, players) => {
                // A concurrent leave can remove the room mid-tick; skip the
                // broadcast instead of addressing a dead session.
                if registry.contains_room(&room).await {
                    let _ = outbound.send(Outbound::ToPlayers {
                        player_ids: players.to_vec(),
                        packet: Packet::SessionState { snapshot },
                    });
                }
            }
        }
    }
}
