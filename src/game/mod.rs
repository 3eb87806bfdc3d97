//! Game sessions - lobby membership, match lifecycle and move validation
//!
//! A session is split into a persisted [`SessionRecord`] and a
//! runtime-only [`SessionRuntime`] that exists once the match has started.
//! [`Session`] owns both and enforces the `Lobby -> Active -> Finished`
//! state machine. None of these types lock internally; callers serialize
//! access per session.

pub mod movement;
mod record;
mod runtime;
mod session;

pub use movement::{try_move, MoveOutcome, MoveRejection};
pub use record::SessionRecord;
pub use runtime::SessionRuntime;
pub use session::{LeaveOutcome, Session, SessionRules, StartClaim};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Seats per session, bots included
pub const MAX_PLAYERS: usize = 4;

/// Seated users needed before a match can start
pub const MIN_PLAYERS: usize = 2;

/// Session name length bounds (in characters, after trimming)
pub const NAME_MIN_LEN: usize = 3;
pub const NAME_MAX_LEN: usize = 50;

/// Identity of a user, issued by the external account system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique session identifier; never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(SessionId)
    }
}

/// Lifecycle of a session; only ever moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Waiting for players
    Lobby,
    /// Match in progress
    Active,
    /// Someone reached the finish
    Finished,
}

impl LifecycleState {
    /// Lobby and Active sessions still hold their participants
    pub fn is_open(&self) -> bool {
        !matches!(self, LifecycleState::Finished)
    }
}

/// Player colour palette, assigned in this order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerColor {
    Red,
    Blue,
    Green,
    Purple,
}

impl PlayerColor {
    pub const PALETTE: [PlayerColor; 4] = [
        PlayerColor::Red,
        PlayerColor::Blue,
        PlayerColor::Green,
        PlayerColor::Purple,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerColor::Red => "red",
            PlayerColor::Blue => "blue",
            PlayerColor::Green => "green",
            PlayerColor::Purple => "purple",
        }
    }
}

/// Failures of lobby and lifecycle operations
///
/// The message is what the requesting client sees.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    ValidationFailed(String),

    #[error("{0}")]
    UpstreamUnavailable(String),
}

impl GameError {
    /// Stable name of the error category
    pub fn kind(&self) -> &'static str {
        match self {
            GameError::NotFound(_) => "NotFound",
            GameError::Conflict(_) => "Conflict",
            GameError::InvalidState(_) => "InvalidState",
            GameError::Forbidden(_) => "Forbidden",
            GameError::ValidationFailed(_) => "ValidationFailed",
            GameError::UpstreamUnavailable(_) => "UpstreamUnavailable",
        }
    }
}
