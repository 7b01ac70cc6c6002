//! Match session state machine
//!
//! One `MatchSession` owns the full state of a single two-player game:
//! paddles, ball, score, readiness, and the difficulty/target negotiation.
//! Sessions move Waiting -> Playing -> Ended and never back. The session
//! registry owns session lifecycle; this type only reports the terminal
//! transition through [`TickOutcome`].

use crate::error::GameError;
use crate::physics;
use log::{debug, info};
use shared::{
    Ball, Difficulty, MatchPlayer, MatchResult, Paddle, PaddleDirection, Score, SessionSnapshot,
    SessionStatus, Side, BALL_BASE_SPEED, DEFAULT_TARGET_SCORE, HARD_BALL_SPEED,
};

/// Minimal player identity carried through matchmaking and sessions.
/// The full profile lives with the user-directory collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRef {
    pub id: u64,
    pub name: String,
}

impl PlayerRef {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Result of advancing a session by one tick.
#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// Session is not playing; nothing happened.
    Idle,
    /// Physics advanced, game continues.
    Running,
    /// The target score was reached this tick. The session is now Ended
    /// and the registry should remove and persist it.
    Ended(MatchResult),
}

#[derive(Debug)]
pub struct MatchSession {
    room: String,
    title: String,
    /// Index 0 defends the left side, index 1 the right.
    players: [PlayerRef; 2],
    paddles: [Paddle; 2],
    ball: Ball,
    score: Score,
    ready: [bool; 2],
    difficulty_votes: [Difficulty; 2],
    target_votes: [u32; 2],
    status: SessionStatus,
}

impl MatchSession {
    pub fn new(room: String, title: String, left: PlayerRef, right: PlayerRef) -> Self {
        Self {
            room,
            title,
            players: [left, right],
            paddles: [Paddle::new(Side::Left), Paddle::new(Side::Right)],
            ball: Ball::new(),
            score: Score::default(),
            ready: [false, false],
            difficulty_votes: [Difficulty::Normal, Difficulty::Normal],
            target_votes: [DEFAULT_TARGET_SCORE, DEFAULT_TARGET_SCORE],
            status: SessionStatus::Waiting,
        }
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn players(&self) -> &[PlayerRef; 2] {
        &self.players
    }

    pub fn player_ids(&self) -> [u64; 2] {
        [self.players[0].id, self.players[1].id]
    }

    pub fn score(&self) -> Score {
        self.score
    }

    /// Player ids that have signaled ready.
    pub fn ready_roster(&self) -> Vec<u64> {
        self.players
            .iter()
            .zip(self.ready.iter())
            .filter(|(_, ready)| **ready)
            .map(|(player, _)| player.id)
            .collect()
    }

    /// Escalation wins: one Hard vote makes the session Hard.
    pub fn difficulty(&self) -> Difficulty {
        if self.difficulty_votes.contains(&Difficulty::Hard) {
            Difficulty::Hard
        } else {
            Difficulty::Normal
        }
    }

    /// Escalation wins: any non-default target vote applies; the lowest
    /// such vote (the shorter race) on disagreement.
    pub fn target_score(&self) -> u32 {
        self.target_votes
            .iter()
            .copied()
            .filter(|v| *v != DEFAULT_TARGET_SCORE)
            .min()
            .unwrap_or(DEFAULT_TARGET_SCORE)
    }

    fn base_speed(&self) -> f32 {
        match self.difficulty() {
            Difficulty::Normal => BALL_BASE_SPEED,
            Difficulty::Hard => HARD_BALL_SPEED,
        }
    }

    fn side_index(&self, player_id: u64) -> Result<usize, GameError> {
        self.players
            .iter()
            .position(|p| p.id == player_id)
            .ok_or(GameError::NotFound)
    }

    /// Flips the ready flag for the player. When both flags become true the
    /// session starts: negotiation freezes and the first serve goes out.
    /// Returns true on the tick the session transitioned to Playing.
    pub fn toggle_ready(&mut self, player_id: u64) -> Result<bool, GameError> {
        let idx = self.side_index(player_id)?;
        if self.status != SessionStatus::Waiting {
            return Err(GameError::InvalidOperation);
        }

        self.ready[idx] = !self.ready[idx];

        if self.ready.iter().all(|r| *r) {
            self.status = SessionStatus::Playing;
            let base_speed = self.base_speed();
            physics::serve(&mut self.ball, base_speed);
            info!(
                "room {}: both players ready, playing to {} ({:?})",
                self.room,
                self.target_score(),
                self.difficulty()
            );
            return Ok(true);
        }

        Ok(false)
    }

    /// Records the player's difficulty vote. Legal only while Waiting.
    pub fn set_difficulty(&mut self, player_id: u64, mode: Difficulty) -> Result<(), GameError> {
        let idx = self.side_index(player_id)?;
        if self.status != SessionStatus::Waiting {
            return Err(GameError::InvalidOperation);
        }

        self.difficulty_votes[idx] = mode;
        Ok(())
    }

    /// Records the player's target-score vote. Legal only while Waiting.
    /// The gateway validates the value against the allowed set before it
    /// gets here.
    pub fn set_target_score(&mut self, player_id: u64, value: u32) -> Result<(), GameError> {
        let idx = self.side_index(player_id)?;
        if self.status != SessionStatus::Waiting {
            return Err(GameError::InvalidOperation);
        }

        self.target_votes[idx] = value;
        Ok(())
    }

    /// Sets the player's paddle input. Legal only while Playing.
    pub fn apply_input(
        &mut self,
        player_id: u64,
        direction: PaddleDirection,
    ) -> Result<(), GameError> {
        let idx = self.side_index(player_id)?;
        if self.status != SessionStatus::Playing {
            return Err(GameError::InvalidOperation);
        }

        self.paddles[idx].direction = direction;
        Ok(())
    }

    /// Advances the session by one tick. No-op unless Playing.
    pub fn tick(&mut self) -> TickOutcome {
        if self.status != SessionStatus::Playing {
            return TickOutcome::Idle;
        }

        for paddle in &mut self.paddles {
            physics::advance_paddle(paddle);
        }

        let base_speed = self.base_speed();
        if let Some(side) = physics::advance_ball(
            &mut self.ball,
            &self.paddles[0],
            &self.paddles[1],
            &mut self.score,
            base_speed,
        ) {
            debug!(
                "room {}: point for {:?}, score {}-{}",
                self.room, side, self.score.left, self.score.right
            );
        }

        let target = self.target_score();
        if self.score.left >= target || self.score.right >= target {
            self.status = SessionStatus::Ended;
            let winner = if self.score.left >= target {
                self.players[0].id
            } else {
                self.players[1].id
            };
            info!(
                "room {}: game over {}-{}, winner {}",
                self.room, self.score.left, self.score.right, winner
            );
            return TickOutcome::Ended(self.result(winner, false));
        }

        TickOutcome::Running
    }

    /// Ends a Playing session immediately with the remaining player as the
    /// winner. Used when a player leaves or their connection times out.
    pub fn forfeit(&mut self, leaver_id: u64) -> Result<MatchResult, GameError> {
        let idx = self.side_index(leaver_id)?;
        if self.status != SessionStatus::Playing {
            return Err(GameError::InvalidOperation);
        }

        self.status = SessionStatus::Ended;
        let winner = self.players[1 - idx].id;
        info!(
            "room {}: player {} forfeited, winner {}",
            self.room, leaver_id, winner
        );
        Ok(self.result(winner, true))
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            room: self.room.clone(),
            status: self.status,
            ball: self.ball,
            left: self.paddles[0],
            right: self.paddles[1],
            score: self.score,
            target_score: self.target_score(),
            difficulty: self.difficulty(),
        }
    }

    fn result(&self, winner_id: u64, forfeit: bool) -> MatchResult {
        MatchResult {
            room: self.room.clone(),
            left: MatchPlayer {
                id: self.players[0].id,
                name: self.players[0].name.clone(),
                points: self.score.left,
            },
            right: MatchPlayer {
                id: self.players[1].id,
                name: self.players[1].name.clone(),
                points: self.score.right,
            },
            winner_id,
            difficulty: self.difficulty(),
            target_score: self.target_score(),
            forfeit,
        }
    }
}
