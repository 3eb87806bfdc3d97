//! Move validation
//!
//! [`try_move`] decides whether a single-step move is legal against the
//! server-held positions and applies it. Rejections are ordinary values,
//! not errors: an invalid move is a no-op and the client reconciles on the
//! next broadcast.

use super::{SessionRuntime, UserId};
use crate::maze::{CellType, Position};
use std::fmt;

/// Why a move was not applied, in the order checks run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveRejection {
    /// The session is not in an active match
    NotActive,
    /// The mover has no position in this match
    UnknownPlayer,
    /// Target equals the current position
    NullMove,
    /// Target is not exactly one orthogonal step away
    NotAdjacent,
    /// Target lies outside the grid
    OutOfBounds,
    /// Target is a wall
    Wall,
    /// Another participant stands on the target
    Occupied,
}

impl fmt::Display for MoveRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            MoveRejection::NotActive => "game is not in progress",
            MoveRejection::UnknownPlayer => "player is not in this game",
            MoveRejection::NullMove => "target is the current position",
            MoveRejection::NotAdjacent => "target is not one step away",
            MoveRejection::OutOfBounds => "target is out of bounds",
            MoveRejection::Wall => "target is a wall",
            MoveRejection::Occupied => "target is occupied",
        };
        f.write_str(reason)
    }
}

/// Result of a move attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Position updated
    Moved(Position),
    /// Position updated and the target is the finish
    Won(Position),
    /// Nothing changed
    Rejected(MoveRejection),
}

impl MoveOutcome {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, MoveOutcome::Rejected(_))
    }
}

/// Validate and apply a move of `player` to `target`
///
/// Performs no locking; the caller must hold exclusive access to the
/// session. Lifecycle state is checked by [`super::Session::apply_move`].
pub fn try_move(runtime: &mut SessionRuntime, player: UserId, target: Position) -> MoveOutcome {
    let Some(current) = runtime.position(player) else {
        return MoveOutcome::Rejected(MoveRejection::UnknownPlayer);
    };

    if target == current {
        return MoveOutcome::Rejected(MoveRejection::NullMove);
    }
    if current.distance(&target) != 1 {
        return MoveOutcome::Rejected(MoveRejection::NotAdjacent);
    }

    let cell = match runtime.grid.get(target) {
        Some(cell) => cell,
        None => return MoveOutcome::Rejected(MoveRejection::OutOfBounds),
    };
    if cell == CellType::Wall {
        return MoveOutcome::Rejected(MoveRejection::Wall);
    }
    if runtime.occupant(target).is_some() {
        return MoveOutcome::Rejected(MoveRejection::Occupied);
    }

    runtime.positions.insert(player, target);

    if cell == CellType::Finish {
        MoveOutcome::Won(target)
    } else {
        MoveOutcome::Moved(target)
    }
}
