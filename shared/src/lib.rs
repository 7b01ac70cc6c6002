use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: u32 = 1;

pub const CANVAS_WIDTH: f32 = 800.0;
pub const CANVAS_HEIGHT: f32 = 600.0;
pub const PADDLE_WIDTH: f32 = 12.0;
pub const PADDLE_HEIGHT: f32 = 96.0;
/// Horizontal gap between each side wall and its paddle face.
pub const PADDLE_MARGIN: f32 = 24.0;
/// Gap kept between a paddle and the bottom wall.
pub const BOUND_MARGIN: f32 = 4.0;
/// Paddle travel per tick while an input direction is held.
pub const PADDLE_SPEED: f32 = 7.0;
pub const BALL_RADIUS: f32 = 8.0;
/// Serve speed in normal mode, in canvas units per tick.
pub const BALL_BASE_SPEED: f32 = 5.0;
/// Serve speed in hard mode.
pub const HARD_BALL_SPEED: f32 = 8.0;
/// Speed gained on every paddle deflection.
pub const BALL_SPEED_INCREMENT: f32 = 0.5;
/// Steepest deflection angle off a paddle edge (±45°).
pub const MAX_BOUNCE_ANGLE: f32 = std::f32::consts::FRAC_PI_4;
pub const DEFAULT_TARGET_SCORE: u32 = 10;
/// Hard-variant race target, selectable during negotiation.
pub const HARD_TARGET_SCORE: u32 = 3;

/// Which half of the canvas a paddle defends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// Paddle input state. `Idle` is the rest state between key events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaddleDirection {
    Up,
    Down,
    Idle,
}

/// Session difficulty mode. Ordering matters: negotiation resolves to the
/// greatest requested variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Difficulty {
    Normal,
    Hard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Waiting,
    Playing,
    Ended,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Ball {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    pub vx: f32,
    pub vy: f32,
    /// Current rally speed. Non-decreasing between serves.
    pub speed: f32,
}

impl Ball {
    /// A ball resting at canvas center. Velocity is set by the first serve.
    pub fn new() -> Self {
        Self {
            x: CANVAS_WIDTH / 2.0,
            y: CANVAS_HEIGHT / 2.0,
            radius: BALL_RADIUS,
            vx: 0.0,
            vy: 0.0,
            speed: BALL_BASE_SPEED,
        }
    }

    pub fn bounds(&self) -> (f32, f32, f32, f32) {
        (
            self.x - self.radius,
            self.y - self.radius,
            self.x + self.radius,
            self.y + self.radius,
        )
    }
}

impl Default for Ball {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Paddle {
    pub side: Side,
    /// Top edge of the paddle.
    pub y: f32,
    pub direction: PaddleDirection,
}

impl Paddle {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            y: (CANVAS_HEIGHT - PADDLE_HEIGHT) / 2.0,
            direction: PaddleDirection::Idle,
        }
    }

    /// Left edge. Fixed per side for the lifetime of the session.
    pub fn x(&self) -> f32 {
        match self.side {
            Side::Left => PADDLE_MARGIN,
            Side::Right => CANVAS_WIDTH - PADDLE_MARGIN - PADDLE_WIDTH,
        }
    }

    pub fn bounds(&self) -> (f32, f32, f32, f32) {
        let x = self.x();
        (x, self.y, x + PADDLE_WIDTH, self.y + PADDLE_HEIGHT)
    }

    pub fn center_y(&self) -> f32 {
        self.y + PADDLE_HEIGHT / 2.0
    }

    /// Greatest legal `y` for any paddle.
    pub fn max_y() -> f32 {
        CANVAS_HEIGHT - PADDLE_HEIGHT - BOUND_MARGIN
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub left: u32,
    pub right: u32,
}

impl Score {
    pub fn award(&mut self, side: Side) {
        match side {
            Side::Left => self.left += 1,
            Side::Right => self.right += 1,
        }
    }

    pub fn of(&self, side: Side) -> u32 {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }
}

/// Per-tick state broadcast to both members of a room while playing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub room: String,
    pub status: SessionStatus,
    pub ball: Ball,
    pub left: Paddle,
    pub right: Paddle,
    pub score: Score,
    pub target_score: u32,
    pub difficulty: Difficulty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchPlayer {
    pub id: u64,
    pub name: String,
    pub points: u32,
}

/// Terminal record of a finished game, handed to the persistence
/// collaborator and broadcast in the end-of-game notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub room: String,
    pub left: MatchPlayer,
    pub right: MatchPlayer,
    pub winner_id: u64,
    pub difficulty: Difficulty,
    pub target_score: u32,
    /// True when the game ended because a player left or timed out.
    pub forfeit: bool,
}

/// Wire-level classification of a rejected operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidOperation,
    AlreadyQueued,
    AlreadyInSession,
    QueueFull,
    DuplicateRoom,
    TargetBusy,
    NotFound,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    // Client to server
    Connect {
        client_version: u32,
        user_id: u64,
        display_name: String,
    },
    Heartbeat {
        timestamp: u64,
    },
    JoinQueue,
    CancelQueue,
    LeaveSession,
    ToggleReady,
    SetDifficulty {
        mode: Difficulty,
    },
    SetTargetScore {
        value: u32,
    },
    PaddleInput {
        direction: PaddleDirection,
    },
    Invite {
        target_name: String,
    },
    AcceptInvite,
    Disconnect,

    // Server to client
    Connected {
        player_id: u64,
        /// Room the player was already in, if reconnecting mid-match.
        resumed_room: Option<String>,
    },
    Queued {
        position: usize,
    },
    MatchFound {
        room: String,
        title: String,
        side: Side,
        opponent: String,
    },
    SessionState {
        snapshot: SessionSnapshot,
    },
    ReadyRoster {
        room: String,
        ready: Vec<u64>,
    },
    SessionClosed {
        room: String,
        reason: String,
    },
    SessionEnded {
        result: MatchResult,
    },
    InviteReceived {
        from_id: u64,
        from_name: String,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
    Disconnected {
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_paddle_fixed_x_per_side() {
        let left = Paddle::new(Side::Left);
        let right = Paddle::new(Side::Right);

        assert_approx_eq!(left.x(), PADDLE_MARGIN);
        assert_approx_eq!(right.x(), CANVAS_WIDTH - PADDLE_MARGIN - PADDLE_WIDTH);
        assert_approx_eq!(left.center_y(), CANVAS_HEIGHT / 2.0);
    }

    #[test]
    fn test_ball_starts_centered() {
        let ball = Ball::new();
        assert_approx_eq!(ball.x, CANVAS_WIDTH / 2.0);
        assert_approx_eq!(ball.y, CANVAS_HEIGHT / 2.0);
        assert_approx_eq!(ball.speed, BALL_BASE_SPEED);

        let (x1, y1, x2, y2) = ball.bounds();
        assert_approx_eq!(x2 - x1, 2.0 * BALL_RADIUS);
        assert_approx_eq!(y2 - y1, 2.0 * BALL_RADIUS);
    }

    #[test]
    fn test_difficulty_escalation_order() {
        assert!(Difficulty::Hard > Difficulty::Normal);
        assert_eq!(
            Difficulty::Normal.max(Difficulty::Hard),
            Difficulty::Hard
        );
    }

    #[test]
    fn test_score_award() {
        let mut score = Score::default();
        score.award(Side::Right);
        score.award(Side::Right);
        score.award(Side::Left);

        assert_eq!(score.of(Side::Right), 2);
        assert_eq!(score.of(Side::Left), 1);
    }

    #[test]
    fn test_snapshot_serialization() {
        let snapshot = SessionSnapshot {
            room: "r-1".to_string(),
            status: SessionStatus::Playing,
            ball: Ball::new(),
            left: Paddle::new(Side::Left),
            right: Paddle::new(Side::Right),
            score: Score { left: 2, right: 1 },
            target_score: HARD_TARGET_SCORE,
            difficulty: Difficulty::Hard,
        };

        let packet = Packet::SessionState { snapshot };
        let bytes = bincode::serialize(&packet).unwrap();
        let decoded: Packet = bincode::deserialize(&bytes).unwrap();

        match decoded {
            Packet::SessionState { snapshot } => {
                assert_eq!(snapshot.room, "r-1");
                assert_eq!(snapshot.status, SessionStatus::Playing);
                assert_eq!(snapshot.score, Score { left: 2, right: 1 });
                assert_eq!(snapshot.difficulty, Difficulty::Hard);
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_error_packet_carries_classification() {
        let packet = Packet::Error {
            kind: ErrorKind::QueueFull,
            message: "matchmaking queue is full".to_string(),
        };

        let bytes = bincode::serialize(&packet).unwrap();
        let decoded: Packet = bincode::deserialize(&bytes).unwrap();

        match decoded {
            Packet::Error { kind, message } => {
                assert_eq!(kind, ErrorKind::QueueFull);
                assert!(!message.is_empty());
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }
}
