//! Realtime gateway mapping connection events to core operations
//!
//! The gateway owns the UDP socket and the boundary between the wire and
//! the game core: a receiver task decodes packets into events, the main
//! loop maps events onto registry/session operations, and a sender task
//! drains the outbound queue shared with the scheduler. Malformed bytes
//! and out-of-range values are rejected here and never reach a session's
//! state machine. A failed operation is reported to the originating
//! connection only.

use crate::collab::{ResultStore, UserDirectory};
use crate::connection::{ConnectionManager, CONNECTION_TIMEOUT};
use crate::error::GameError;
use crate::registry::{SessionHandle, SessionRegistry};
use crate::session::PlayerRef;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{
    Difficulty, ErrorKind, Packet, PaddleDirection, SessionStatus, Side, DEFAULT_TARGET_SCORE,
    HARD_TARGET_SCORE, PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};

/// Events flowing from the network tasks into the gateway's main loop.
#[derive(Debug)]
pub enum GatewayEvent {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    ConnectionTimeout {
        player_id: u64,
    },
    #[allow(dead_code)]
    Shutdown,
}

/// Outbound notifications queued for the sender task. Both the gateway and
/// the scheduler feed this queue; the sender resolves player ids to
/// addresses at transmission time.
#[derive(Debug)]
pub enum Outbound {
    ToAddr {
        packet: Packet,
        addr: SocketAddr,
    },
    ToPlayer {
        player_id: u64,
        packet: Packet,
    },
    ToPlayers {
        player_ids: Vec<u64>,
        packet: Packet,
    },
}

/// Boundary layer between persistent client connections and the game core.
pub struct Gateway {
    socket: Arc<UdpSocket>,
    connections: Arc<RwLock<ConnectionManager>>,
    registry: Arc<SessionRegistry>,
    directory: Arc<dyn UserDirectory>,
    results: Arc<dyn ResultStore>,

    event_tx: mpsc::UnboundedSender<GatewayEvent>,
    event_rx: mpsc::UnboundedReceiver<GatewayEvent>,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    outbound_rx: mpsc::UnboundedReceiver<Outbound>,
}

impl Gateway {
    pub async fn new(
        addr: &str,
        registry: Arc<SessionRegistry>,
        directory: Arc<dyn UserDirectory>,
        results: Arc<dyn ResultStore>,
        max_connections: usize,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("gateway listening on {}", socket.local_addr()?);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        Ok(Gateway {
            socket,
            connections: Arc::new(RwLock::new(ConnectionManager::new(max_connections))),
            registry,
            directory,
            results,
            event_tx,
            event_rx,
            outbound_tx,
            outbound_rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.socket.local_addr()
    }

    /// Sender half of the outbound queue, for the scheduler.
    pub fn outbound_sender(&self) -> mpsc::UnboundedSender<Outbound> {
        self.outbound_tx.clone()
    }

    /// Spawns the task that listens for incoming packets.
    fn spawn_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if event_tx
                                .send(GatewayEvent::PacketReceived { packet, addr })
                                .is_err()
                            {
                                break;
                            }
                        } else {
                            warn!("failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns the task that drains the outbound queue onto the socket.
    fn spawn_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let connections = Arc::clone(&self.connections);
        let mut outbound_rx =
            std::mem::replace(&mut self.outbound_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let addrs: Vec<SocketAddr> = match &message {
                    Outbound::ToAddr { addr, .. } => vec![*addr],
                    Outbound::ToPlayer { player_id, .. } => {
                        let connections = connections.read().await;
                        connections.addr_of(*player_id).into_iter().collect()
                    }
                    Outbound::ToPlayers { player_ids, .. } => {
                        let connections = connections.read().await;
                        connections.addrs_of(player_ids)
                    }
                };

                let packet = match message {
                    Outbound::ToAddr { packet, .. }
                    | Outbound::ToPlayer { packet, .. }
                    | Outbound::ToPlayers { packet, .. } => packet,
                };

                match serialize(&packet) {
                    Ok(data) => {
                        for addr in addrs {
                            if let Err(e) = socket.send_to(&data, addr).await {
                                error!("failed to send packet to {}: {}", addr, e);
                            }
                        }
                    }
                    Err(e) => error!("failed to serialize outbound packet: {}", e),
                }
            }
        });
    }

    /// Spawns the task that sweeps silent connections.
    fn spawn_timeout_checker(&self) {
        let connections = Arc::clone(&self.connections);
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut connections = connections.write().await;
                    connections.check_timeouts(CONNECTION_TIMEOUT)
                };

                for player_id in timed_out {
                    if event_tx
                        .send(GatewayEvent::ConnectionTimeout { player_id })
                        .is_err()
                    {
                        return;
                    }
                }
            }
        });
    }

    /// Main gateway loop. Spawns the network tasks, then maps each event
    /// onto the matching core operation until shutdown.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_receiver();
        self.spawn_sender();
        self.spawn_timeout_checker();

        info!("gateway started");

        loop {
            match self.event_rx.recv().await {
                Some(GatewayEvent::PacketReceived { packet, addr }) => {
                    self.handle_packet(packet, addr).await;
                }
                Some(GatewayEvent::ConnectionTimeout { player_id }) => {
                    warn!("player {} timed out", player_id);
                    let player = self
                        .directory
                        .lookup_by_id(player_id)
                        .unwrap_or_else(|| PlayerRef::new(player_id, format!("player-{}", player_id)));
                    self.drop_player(player).await;
                }
                Some(GatewayEvent::Shutdown) | None => {
                    info!("gateway shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    fn send(&self, message: Outbound) {
        if self.outbound_tx.send(message).is_err() {
            error!("failed to queue outbound packet");
        }
    }

    fn send_error(&self, addr: SocketAddr, err: GameError) {
        self.send(Outbound::ToAddr {
            packet: Packet::Error {
                kind: err.into(),
                message: err.to_string(),
            },
            addr,
        });
    }

    /// Resolves the sender of a packet to their verified identity.
    async fn player_at(&self, addr: SocketAddr) -> Option<PlayerRef> {
        let connections = self.connections.read().await;
        let player_id = connections.find_by_addr(addr)?;
        connections.get(player_id).map(|conn| conn.player.clone())
    }

    /// Current room and session handle for a player.
    async fn session_of(&self, player_id: u64) -> Result<(String, SessionHandle), GameError> {
        let room = self
            .registry
            .room_for_player(player_id)
            .await
            .ok_or(GameError::NotFound)?;
        let handle = self
            .registry
            .get_by_room(&room)
            .await
            .ok_or(GameError::NotFound)?;
        Ok((room, handle))
    }

    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        // Any traffic from a known connection counts as activity.
        {
            let mut connections = self.connections.write().await;
            if let Some(player_id) = connections.find_by_addr(addr) {
                connections.touch(player_id);
            }
        }

        match packet {
            Packet::Connect {
                client_version,
                user_id,
                display_name,
            } => {
                self.handle_connect(addr, client_version, user_id, display_name)
                    .await;
            }
            // Heartbeats exist only to refresh last-seen, handled above.
            Packet::Heartbeat { .. } => {}
            other => {
                let player = match self.player_at(addr).await {
                    Some(player) => player,
                    None => {
                        debug!("ignoring packet from unknown address {}", addr);
                        return;
                    }
                };

                match other {
                    Packet::JoinQueue => self.handle_join_queue(player, addr).await,
                    Packet::CancelQueue => self.handle_cancel_queue(player, addr).await,
                    Packet::LeaveSession => self.handle_leave(player, addr).await,
                    Packet::ToggleReady => self.handle_toggle_ready(player, addr).await,
                    Packet::SetDifficulty { mode } => {
                        self.handle_set_difficulty(player, addr, mode).await
                    }
                    Packet::SetTargetScore { value } => {
                        self.handle_set_target_score(player, addr, value).await
                    }
                    Packet::PaddleInput { direction } => {
                        self.handle_paddle_input(player, addr, direction).await
                    }
                    Packet::Invite { target_name } => {
                        self.handle_invite(player, addr, target_name).await
                    }
                    Packet::AcceptInvite => self.handle_accept_invite(player, addr).await,
                    Packet::Disconnect => {
                        {
                            let mut connections = self.connections.write().await;
                            connections.remove(player.id);
                        }
                        self.drop_player(player).await;
                    }
                    _ => {
                        warn!("unexpected packet type from client at {}", addr);
                    }
                }
            }
        }
    }

    async fn handle_connect(
        &mut self,
        addr: SocketAddr,
        client_version: u32,
        user_id: u64,
        display_name: String,
    ) {
        if client_version != PROTOCOL_VERSION {
            info!(
                "rejecting connection from {} (version {})",
                addr, client_version
            );
            self.send(Outbound::ToAddr {
                packet: Packet::Disconnected {
                    reason: "protocol version mismatch".to_string(),
                },
                addr,
            });
            return;
        }

        // Identity was vouched for by the auth collaborator; mirror it into
        // the user directory so invites can find this player by name.
        let player = PlayerRef::new(user_id, display_name);
        self.directory.register(player.clone());

        let registered = {
            let mut connections = self.connections.write().await;
            connections.register(player, addr)
        };

        if !registered {
            self.send(Outbound::ToAddr {
                packet: Packet::Disconnected {
                    reason: "server is full".to_string(),
                },
                addr,
            });
            return;
        }

        let resumed_room = self.registry.room_for_player(user_id).await;
        self.send(Outbound::ToAddr {
            packet: Packet::Connected {
                player_id: user_id,
                resumed_room,
            },
            addr,
        });
    }

    async fn handle_join_queue(&mut self, player: PlayerRef, addr: SocketAddr) {
        match self.registry.enqueue(player).await {
            Ok(position) => self.send(Outbound::ToAddr {
                packet: Packet::Queued { position },
                addr,
            }),
            Err(e) => self.send_error(addr, e),
        }
    }

    async fn handle_cancel_queue(&mut self, player: PlayerRef, addr: SocketAddr) {
        if !self.registry.cancel_queue(player.id).await {
            self.send_error(addr, GameError::NotFound);
        }
    }

    async fn handle_toggle_ready(&mut self, player: PlayerRef, addr: SocketAddr) {
        let (room, handle) = match self.session_of(player.id).await {
            Ok(found) => found,
            Err(e) => return self.send_error(addr, e),
        };

        let outcome = {
            let mut session = handle.lock().await;
            match session.toggle_ready(player.id) {
                Ok(_) => Ok((session.ready_roster(), session.player_ids())),
                Err(e) => Err(e),
            }
        };

        match outcome {
            Ok((ready, players)) => {
                self.send(Outbound::ToPlayers {
                    player_ids: players.to_vec(),
                    packet: Packet::ReadyRoster { room, ready },
                });
            }
            Err(e) => self.send_error(addr, e),
        }
    }

    async fn handle_set_difficulty(
        &mut self,
        player: PlayerRef,
        addr: SocketAddr,
        mode: Difficulty,
    ) {
        let (_room, handle) = match self.session_of(player.id).await {
            Ok(found) => found,
            Err(e) => return self.send_error(addr, e),
        };

        let result = {
            let mut session = handle.lock().await;
            session.set_difficulty(player.id, mode)
        };

        if let Err(e) = result {
            self.send_error(addr, e);
        }
    }

    async fn handle_set_target_score(&mut self, player: PlayerRef, addr: SocketAddr, value: u32) {
        // Boundary validation: an out-of-range value never reaches the
        // session's state machine.
        if value != DEFAULT_TARGET_SCORE && value != HARD_TARGET_SCORE {
            self.send(Outbound::ToAddr {
                packet: Packet::Error {
                    kind: ErrorKind::InvalidOperation,
                    message: format!(
                        "target score must be {} or {}",
                        DEFAULT_TARGET_SCORE, HARD_TARGET_SCORE
                    ),
                },
                addr,
            });
            return;
        }

        let (_room, handle) = match self.session_of(player.id).await {
            Ok(found) => found,
            Err(e) => return self.send_error(addr, e),
        };

        let result = {
            let mut session = handle.lock().await;
            session.set_target_score(player.id, value)
        };

        if let Err(e) = result {
            self.send_error(addr, e);
        }
    }

    async fn handle_paddle_input(
        &mut self,
        player: PlayerRef,
        addr: SocketAddr,
        direction: PaddleDirection,
    ) {
        let (_room, handle) = match self.session_of(player.id).await {
            Ok(found) => found,
            Err(e) => return self.send_error(addr, e),
        };

        let result = {
            let mut session = handle.lock().await;
            session.apply_input(player.id, direction)
        };

        if let Err(e) = result {
            self.send_error(addr, e);
        }
    }

    async fn handle_invite(&mut self, player: PlayerRef, addr: SocketAddr, target_name: String) {
        let target = match self.directory.lookup_by_name(&target_name) {
            Some(target) => target,
            None => return self.send_error(addr, GameError::NotFound),
        };

        if target.id == player.id {
            return self.send_error(addr, GameError::InvalidOperation);
        }

        if self.registry.room_for_player(target.id).await.is_some() {
            return self.send_error(addr, GameError::TargetBusy);
        }

        let delivered = {
            let mut connections = self.connections.write().await;
            connections.set_pending_invite(target.id, player.clone())
        };

        if !delivered {
            // Known user, but not connected right now.
            return self.send_error(addr, GameError::NotFound);
        }

        info!("player {} invited {} to a game", player.id, target.id);
        self.send(Outbound::ToPlayer {
            player_id: target.id,
            packet: Packet::InviteReceived {
                from_id: player.id,
                from_name: player.name,
            },
        });
    }

    async fn handle_accept_invite(&mut self, player: PlayerRef, addr: SocketAddr) {
        let host = {
            let mut connections = self.connections.write().await;
            connections.take_pending_invite(player.id)
        };

        let host = match host {
            Some(host) => host,
            None => return self.send_error(addr, GameError::InvalidOperation),
        };

        let host_online = {
            let connections = self.connections.read().await;
            connections.addr_of(host.id).is_some()
        };
        if !host_online {
            return self.send_error(addr, GameError::NotFound);
        }

        let room = self.registry.generate_room_token().await;
        let title = format!("{} vs {}", host.name, player.name);

        match self
            .registry
            .create_invite_session(room.clone(), title.clone(), host.clone(), player.clone())
            .await
        {
            Ok(_) => {
                self.send(Outbound::ToPlayer {
                    player_id: host.id,
                    packet: Packet::MatchFound {
                        room: room.clone(),
                        title: title.clone(),
                        side: Side::Left,
                        opponent: player.name.clone(),
                    },
                });
                self.send(Outbound::ToAddr {
                    packet: Packet::MatchFound {
                        room,
                        title,
                        side: Side::Right,
                        opponent: host.name,
                    },
                    addr,
                });
            }
            Err(e) => self.send_error(addr, e),
        }
    }

    async fn handle_leave(&mut self, player: PlayerRef, addr: SocketAddr) {
        let (room, handle) = match self.session_of(player.id).await {
            Ok(found) => found,
            Err(e) => return self.send_error(addr, e),
        };

        let status = {
            let session = handle.lock().await;
            session.status()
        };

        match status {
            SessionStatus::Waiting => self.close_waiting_room(&room, &handle, &player).await,
            SessionStatus::Playing => self.finish_forfeit(&room, &handle, player.id).await,
            // The scheduler is already finishing this session.
            SessionStatus::Ended => {}
        }
    }

    /// Tears down a session that never started and tells the peer.
    async fn close_waiting_room(&mut self, room: &str, handle: &SessionHandle, leaver: &PlayerRef) {
        if self.registry.delete_by_room(room).await.is_none() {
            return;
        }

        let players = {
            let session = handle.lock().await;
            session.player_ids()
        };
        let peers: Vec<u64> = players
            .iter()
            .copied()
            .filter(|id| *id != leaver.id)
            .collect();

        self.send(Outbound::ToPlayers {
            player_ids: peers,
            packet: Packet::SessionClosed {
                room: room.to_string(),
                reason: format!("{} left the room", leaver.name),
            },
        });
    }

    /// Ends a running game that one player abandoned: the session is
    /// removed, the result persisted, and both players notified.
    async fn finish_forfeit(&mut self, room: &str, handle: &SessionHandle, leaver_id: u64) {
        let result = {
            let mut session = handle.lock().await;
            session.forfeit(leaver_id)
        };

        let result = match result {
            Ok(result) => result,
            // Lost the race against the scheduler's own end-of-game path.
            Err(_) => return,
        };

        self.registry.delete_by_room(room).await;
        self.results.record_finished_game(&result);

        let players = vec![result.left.id, result.right.id];
        self.send(Outbound::ToPlayers {
            player_ids: players,
            packet: Packet::SessionEnded { result },
        });
    }

    /// Common cleanup when a player's connection goes away for any reason:
    /// leave the queue, and close or forfeit their room.
    async fn drop_player(&mut self, player: PlayerRef) {
        self.registry.cancel_queue(player.id).await;

        if let Ok((room, handle)) = self.session_of(player.id).await {
            let status = {
                let session = handle.lock().await;
                session.status()
            };

            match status {
                SessionStatus::Waiting => self.close_waiting_room(&room, &handle, &player).await,
                SessionStatus::Playing => self.finish_forfeit(&room, &handle, player.id).await,
                SessionStatus::Ended => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{InMemoryResultStore, InMemoryUserDirectory};

    async fn test_gateway() -> Gateway {
        let registry = Arc::new(SessionRegistry::new(16));
        let directory: Arc<dyn UserDirectory> = Arc::new(InMemoryUserDirectory::new());
        let results: Arc<dyn ResultStore> = Arc::new(InMemoryResultStore::new());
        Gateway::new("127.0.0.1:0", registry, directory, results, 8)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_gateway_binds_ephemeral_port() {
        let gateway = test_gateway().await;
        let addr = gateway.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_connect_registers_identity_and_replies() {
        let mut gateway = test_gateway().await;
        let client_addr: SocketAddr = "127.0.0.1:40001".parse().unwrap();

        gateway
            .handle_packet(
                Packet::Connect {
                    client_version: PROTOCOL_VERSION,
                    user_id: 7,
                    display_name: "alice".to_string(),
                },
                client_addr,
            )
            .await;

        assert_eq!(
            gateway.player_at(client_addr).await,
            Some(PlayerRef::new(7, "alice"))
        );
        assert!(gateway.directory.lookup_by_name("alice").is_some());

        match gateway.outbound_rx.recv().await.unwrap() {
            Outbound::ToAddr { packet, addr } => {
                assert_eq!(addr, client_addr);
                match packet {
                    Packet::Connected {
                        player_id,
                        resumed_room,
                    } => {
                        assert_eq!(player_id, 7);
                        assert_eq!(resumed_room, None);
                    }
                    other => panic!("expected Connected, got {:?}", other),
                }
            }
            other => panic!("unexpected outbound message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_version_mismatch_is_rejected() {
        let mut gateway = test_gateway().await;
        let client_addr: SocketAddr = "127.0.0.1:40002".parse().unwrap();

        gateway
            .handle_packet(
                Packet::Connect {
                    client_version: PROTOCOL_VERSION + 1,
                    user_id: 7,
                    display_name: "alice".to_string(),
                },
                client_addr,
            )
            .await;

        assert_eq!(gateway.player_at(client_addr).await, None);
        match gateway.outbound_rx.recv().await.unwrap() {
            Outbound::ToAddr { packet, .. } => {
                assert!(matches!(packet, Packet::Disconnected { .. }));
            }
            other => panic!("unexpected outbound message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_address_is_ignored() {
        let mut gateway = test_gateway().await;
        let client_addr: SocketAddr = "127.0.0.1:40003".parse().unwrap();

        gateway.handle_packet(Packet::JoinQueue, client_addr).await;

        // No identity, no reply of any kind.
        assert!(gateway.outbound_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_join_queue_and_queue_errors() {
        let mut gateway = test_gateway().await;
        let client_addr: SocketAddr = "127.0.0.1:40004".parse().unwrap();

        gateway
            .handle_packet(
                Packet::Connect {
                    client_version: PROTOCOL_VERSION,
                    user_id: 1,
                    display_name: "alice".to_string(),
                },
                client_addr,
            )
            .await;
        let _ = gateway.outbound_rx.recv().await;

        gateway.handle_packet(Packet::JoinQueue, client_addr).await;
        match gateway.outbound_rx.recv().await.unwrap() {
            Outbound::ToAddr { packet, .. } => {
                assert!(matches!(packet, Packet::Queued { position: 1 }));
            }
            other => panic!("unexpected outbound message: {:?}", other),
        }

        // Joining twice is rejected on this connection only.
        gateway.handle_packet(Packet::JoinQueue, client_addr).await;
        match gateway.outbound_rx.recv().await.unwrap() {
            Outbound::ToAddr { packet, addr } => {
                assert_eq!(addr, client_addr);
                match packet {
                    Packet::Error { kind, .. } => assert_eq!(kind, ErrorKind::AlreadyQueued),
                    other => panic!("expected Error, got {:?}", other),
                }
            }
            other => panic!("unexpected outbound message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_out_of_range_target_score_is_rejected_at_boundary() {
        let mut gateway = test_gateway().await;
        let client_addr: SocketAddr = "127.0.0.1:40005".parse().unwrap();

        gateway
            .handle_packet(
                Packet::Connect {
                    client_version: PROTOCOL_VERSION,
                    user_id: 1,
                    display_name: "alice".to_string(),
                },
                client_addr,
            )
            .await;
        let _ = gateway.outbound_rx.recv().await;

        gateway
            .handle_packet(Packet::SetTargetScore { value: 42 }, client_addr)
            .await;

        match gateway.outbound_rx.recv().await.unwrap() {
            Outbound::ToAddr { packet, .. } => match packet {
                Packet::Error { kind, message } => {
                    assert_eq!(kind, ErrorKind::InvalidOperation);
                    assert!(message.contains("target score"));
                }
                other => panic!("expected Error, got {:?}", other),
            },
            other => panic!("unexpected outbound message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invite_flow_parks_and_delivers() {
        let mut gateway = test_gateway().await;
        let alice_addr: SocketAddr = "127.0.0.1:40006".parse().unwrap();
        let bob_addr: SocketAddr = "127.0.0.1:40007".parse().unwrap();

        for (addr, id, name) in [(alice_addr, 1u64, "alice"), (bob_addr, 2u64, "bob")] {
            gateway
                .handle_packet(
                    Packet::Connect {
                        client_version: PROTOCOL_VERSION,
                        user_id: id,
                        display_name: name.to_string(),
                    },
                    addr,
                )
                .await;
            let _ = gateway.outbound_rx.recv().await;
        }

        gateway
            .handle_packet(
                Packet::Invite {
                    target_name: "bob".to_string(),
                },
                alice_addr,
            )
            .await;

        match gateway.outbound_rx.recv().await.unwrap() {
            Outbound::ToPlayer { player_id, packet } => {
                assert_eq!(player_id, 2);
                match packet {
                    Packet::InviteReceived { from_id, from_name } => {
                        assert_eq!(from_id, 1);
                        assert_eq!(from_name, "alice");
                    }
                    other => panic!("expected InviteReceived, got {:?}", other),
                }
            }
            other => panic!("unexpected outbound message: {:?}", other),
        }

        gateway.handle_packet(Packet::AcceptInvite, bob_addr).await;

        // Host is seated on the left, accepter on the right.
        let mut sides = Vec::new();
        for _ in 0..2 {
            match gateway.outbound_rx.recv().await.unwrap() {
                Outbound::ToPlayer { player_id, packet } => match packet {
                    Packet::MatchFound { side, .. } => sides.push((player_id, side)),
                    other => panic!("expected MatchFound, got {:?}", other),
                },
                Outbound::ToAddr { addr, packet } => match packet {
                    Packet::MatchFound { side, .. } => {
                        assert_eq!(addr, bob_addr);
                        sides.push((2, side));
                    }
                    other => panic!("expected MatchFound, got {:?}", other),
                },
                other => panic!("unexpected outbound message: {:?}", other),
            }
        }
        assert!(sides.contains(&(1, Side::Left)));
        assert!(sides.contains(&(2, Side::Right)));

        let room = gateway.registry.room_for_player(1).await;
        assert!(room.is_some());
        assert_eq!(room, gateway.registry.room_for_player(2).await);
    }

    #[tokio::test]
    async fn test_accept_without_invite_is_invalid() {
        let mut gateway = test_gateway().await;
        let client_addr: SocketAddr = "127.0.0.1:40008".parse().unwrap();

        gateway
            .handle_packet(
                Packet::Connect {
                    client_version: PROTOCOL_VERSION,
                    user_id: 1,
                    display_name: "alice".to_string(),
                },
                client_addr,
            )
            .await;
        let _ = gateway.outbound_rx.recv().await;

        gateway.handle_packet(Packet::AcceptInvite, client_addr).await;

        match gateway.outbound_rx.recv().await.unwrap() {
            Outbound::ToAddr { packet, .. } => match packet {
                Packet::Error { kind, .. } => assert_eq!(kind, ErrorKind::InvalidOperation),
                other => panic!("expected Error, got {:?}", other),
            },
            other => panic!("unexpected outbound message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invite_busy_target_rejected() {
        let mut gateway = test_gateway().await;
        let alice_addr: SocketAddr = "127.0.0.1:40009".parse().unwrap();
        let bob_addr: SocketAddr = "127.0.0.1:40010".parse().unwrap();

        for (addr, id, name) in [(alice_addr, 1u64, "alice"), (bob_addr, 2u64, "bob")] {
            gateway
                .handle_packet(
                    Packet::Connect {
                        client_version: PROTOCOL_VERSION,
                        user_id: id,
                        display_name: name.to_string(),
                    },
                    addr,
                )
                .await;
            let _ = gateway.outbound_rx.recv().await;
        }

        // Bob is mid-match with someone else.
        gateway
            .registry
            .create_session(
                "r-1".to_string(),
                "t".to_string(),
                PlayerRef::new(2, "bob"),
                PlayerRef::new(3, "carol"),
            )
            .await
            .unwrap();

        gateway
            .handle_packet(
                Packet::Invite {
                    target_name: "bob".to_string(),
                },
                alice_addr,
            )
            .await;

        match gateway.outbound_rx.recv().await.unwrap() {
            Outbound::ToAddr { packet, addr } => {
                assert_eq!(addr, alice_addr);
                match packet {
                    Packet::Error { kind, .. } => assert_eq!(kind, ErrorKind::TargetBusy),
                    other => panic!("expected Error, got {:?}", other),
                }
            }
            other => panic!("unexpected outbound message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_leave_waiting_room_closes_it_and_tells_peer() {
        let mut gateway = test_gateway().await;
        let alice_addr: SocketAddr = "127.0.0.1:40011".parse().unwrap();

        gateway
            .handle_packet(
                Packet::Connect {
                    client_version: PROTOCOL_VERSION,
                    user_id: 1,
                    display_name: "alice".to_string(),
                },
                alice_addr,
            )
            .await;
        let _ = gateway.outbound_rx.recv().await;

        gateway
            .registry
            .create_session(
                "r-1".to_string(),
                "t".to_string(),
                PlayerRef::new(1, "alice"),
                PlayerRef::new(2, "bob"),
            )
            .await
            .unwrap();

        gateway.handle_packet(Packet::LeaveSession, alice_addr).await;

        assert!(!gateway.registry.contains_room("r-1").await);
        assert_eq!(gateway.registry.room_for_player(2).await, None);

        match gateway.outbound_rx.recv().await.unwrap() {
            Outbound::ToPlayers { player_ids, packet } => {
                assert_eq!(player_ids, vec![2]);
                assert!(matches!(packet, Packet::SessionClosed { .. }));
            }
            other => panic!("unexpected outbound message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disconnect_mid_game_forfeits_once() {
        let mut gateway = test_gateway().await;
        let alice_addr: SocketAddr = "127.0.0.1:40012".parse().unwrap();

        gateway
            .handle_packet(
                Packet::Connect {
                    client_version: PROTOCOL_VERSION,
                    user_id: 1,
                    display_name: "alice".to_string(),
                },
                alice_addr,
            )
            .await;
        let _ = gateway.outbound_rx.recv().await;

        let handle = gateway
            .registry
            .create_session(
                "r-1".to_string(),
                "t".to_string(),
                PlayerRef::new(1, "alice"),
                PlayerRef::new(2, "bob"),
            )
            .await
            .unwrap();
        {
            let mut session = handle.lock().await;
            session.toggle_ready(1).unwrap();
            session.toggle_ready(2).unwrap();
        }

        gateway.handle_packet(Packet::Disconnect, alice_addr).await;

        assert!(!gateway.registry.contains_room("r-1").await);
        assert_eq!(gateway.player_at(alice_addr).await, None);

        match gateway.outbound_rx.recv().await.unwrap() {
            Outbound::ToPlayers { packet, .. } => match packet {
                Packet::SessionEnded { result } => {
                    assert!(result.forfeit);
                    assert_eq!(result.winner_id, 2);
                }
                other => panic!("expected SessionEnded, got {:?}", other),
            },
            other => panic!("unexpected outbound message: {:?}", other),
        }
    }
}
