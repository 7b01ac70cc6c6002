//! Error taxonomy for the game core
//!
//! Every core operation returns one of these classifications instead of
//! terminating the process. The gateway alone translates a failure into a
//! notification on the originating connection; no failure touches any other
//! session.

use shared::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    /// A state-machine precondition was violated.
    #[error("operation is not valid in the session's current state")]
    InvalidOperation,

    /// Player is already waiting in the matchmaking queue.
    #[error("already waiting in the matchmaking queue")]
    AlreadyQueued,

    /// Player already belongs to an active session.
    #[error("already in an active match")]
    AlreadyInSession,

    /// The matchmaking queue is at capacity.
    #[error("the matchmaking queue is full, try again later")]
    QueueFull,

    /// Room token is already registered.
    #[error("a room with this token already exists")]
    DuplicateRoom,

    /// The invited player already has a room.
    #[error("that player is already in a match")]
    TargetBusy,

    /// Unknown room or player reference.
    #[error("no such room or player")]
    NotFound,
}

impl From<GameError> for ErrorKind {
    fn from(err: GameError) -> Self {
        match err {
            GameError::InvalidOperation => ErrorKind::InvalidOperation,
            GameError::AlreadyQueued => ErrorKind::AlreadyQueued,
            GameError::AlreadyInSession => ErrorKind::AlreadyInSession,
            GameError::QueueFull => ErrorKind::QueueFull,
            GameError::DuplicateRoom => ErrorKind::DuplicateRoom,
            GameError::TargetBusy => ErrorKind::TargetBusy,
            GameError::NotFound => ErrorKind::NotFound,
        }
    }
}
