//! Session aggregate - lobby operations and the match state machine

use super::movement::{try_move, MoveOutcome, MoveRejection};
use super::{
    GameError, LifecycleState, PlayerColor, SessionId, SessionRecord, SessionRuntime, UserId,
    MAX_PLAYERS, MIN_PLAYERS,
};
use crate::maze::{CellType, MazeLayout, Position};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;

/// Capacity rules applied to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionRules {
    /// Seats, bots included
    pub max_players: usize,
    /// Seated users required to start
    pub min_players: usize,
}

impl Default for SessionRules {
    fn default() -> Self {
        Self {
            max_players: MAX_PLAYERS,
            min_players: MIN_PLAYERS,
        }
    }
}

/// Result of a successful leave
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveOutcome {
    /// The lobby is now empty and must be deleted
    pub emptied: bool,
}

/// Granted by [`Session::claim_start`]; the holder must follow up with
/// [`Session::activate`] or [`Session::abandon_start`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartClaim {
    pub players: usize,
}

/// One maze match, from lobby to finish
#[derive(Debug, Clone)]
pub struct Session {
    record: SessionRecord,
    runtime: Option<SessionRuntime>,
    rules: SessionRules,
    start_claimed: bool,
    retired: bool,
}

impl Session {
    /// Create an empty lobby
    pub fn create(name: &str, rules: SessionRules) -> Result<Self, GameError> {
        Ok(Self::restore(SessionRecord::new(name)?, rules))
    }

    /// Rebuild a session from a stored record. Only lobbies can be resumed;
    /// the runtime of an active match is never persisted.
    pub fn restore(record: SessionRecord, rules: SessionRules) -> Self {
        Self {
            record,
            runtime: None,
            rules,
            start_claimed: false,
            retired: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.record.id()
    }

    pub fn record(&self) -> &SessionRecord {
        &self.record
    }

    pub fn runtime(&self) -> Option<&SessionRuntime> {
        self.runtime.as_ref()
    }

    pub fn state(&self) -> LifecycleState {
        self.record.state()
    }

    pub fn rules(&self) -> SessionRules {
        self.rules
    }

    /// A start has been claimed but the match is not active yet
    pub fn is_starting(&self) -> bool {
        self.start_claimed && self.state() == LifecycleState::Lobby
    }

    /// Deleted sessions reject every operation
    pub fn is_retired(&self) -> bool {
        self.retired
    }

    pub fn is_full(&self) -> bool {
        self.record.total_participants() >= self.rules.max_players
    }

    /// Mark this session deleted. Handles still held elsewhere see it as gone.
    pub fn retire(&mut self) {
        self.retired = true;
    }

    /// Put back a record captured before a mutation whose persistence failed
    pub fn rollback(&mut self, record: SessionRecord) {
        debug_assert_eq!(record.id(), self.record.id());
        self.record = record;
    }

    fn ensure_lobby(&self) -> Result<(), GameError> {
        if self.retired {
            return Err(GameError::NotFound("Game not found".into()));
        }
        if self.state() != LifecycleState::Lobby {
            return Err(GameError::InvalidState("Game is no longer in the lobby".into()));
        }
        if self.start_claimed {
            return Err(GameError::InvalidState("Game is starting".into()));
        }
        Ok(())
    }

    /// Seat a user in the lobby
    pub fn join(&mut self, user: UserId) -> Result<(), GameError> {
        self.ensure_lobby()?;
        if self.record.is_participant(user) {
            return Err(GameError::Conflict("You are already in this game".into()));
        }
        if self.is_full() {
            return Err(GameError::Conflict("Game is full".into()));
        }
        self.record.seat(user);
        Ok(())
    }

    /// Remove a user from the lobby
    ///
    /// Bots never keep a lobby alive: when the last user leaves the outcome
    /// reports the lobby as emptied.
    pub fn leave(&mut self, user: UserId) -> Result<LeaveOutcome, GameError> {
        self.ensure_lobby()?;
        if !self.record.unseat(user) {
            return Err(GameError::NotFound("You are not in this game".into()));
        }
        Ok(LeaveOutcome {
            emptied: self.record.participants().is_empty(),
        })
    }

    /// Add a bot seat. Returns the new bot count.
    pub fn add_bot(&mut self, requester: UserId) -> Result<usize, GameError> {
        if self.retired {
            return Err(GameError::NotFound("Game not found".into()));
        }
        if !self.record.is_participant(requester) {
            return Err(GameError::Forbidden("You are not in this game".into()));
        }
        self.ensure_lobby()?;
        if self.is_full() {
            return Err(GameError::Conflict("Game is full".into()));
        }
        self.record.add_bot();
        Ok(self.record.bot_count())
    }

    /// First phase of starting: claim the transition so no second start can
    /// begin while the maze is being generated
    pub fn claim_start(&mut self, requester: UserId) -> Result<StartClaim, GameError> {
        if self.retired {
            return Err(GameError::NotFound("Game not found".into()));
        }
        if self.state() != LifecycleState::Lobby || self.start_claimed {
            return Err(GameError::InvalidState(
                "Someone else already started the game. Hold on tight!".into(),
            ));
        }
        if !self.record.is_participant(requester) {
            return Err(GameError::Forbidden("You are not in this game".into()));
        }
        let players = self.record.participants().len();
        if players < self.rules.min_players {
            return Err(GameError::InvalidState(format!(
                "At least {} players are needed to start",
                self.rules.min_players
            )));
        }

        self.start_claimed = true;
        Ok(StartClaim { players })
    }

    /// Release a claim without starting
    pub fn abandon_start(&mut self) {
        if self.state() == LifecycleState::Lobby {
            self.runtime = None;
        }
        self.start_claimed = false;
    }

    /// Second phase of starting: install the maze, place players, assign
    /// colours and flip to Active
    pub fn activate(&mut self, layout: MazeLayout) -> Result<(), GameError> {
        self.activate_with_rng(layout, &mut rand::thread_rng())
    }

    /// [`Session::activate`] with a caller-supplied RNG for bot colours
    pub fn activate_with_rng<R: Rng + ?Sized>(
        &mut self,
        layout: MazeLayout,
        rng: &mut R,
    ) -> Result<(), GameError> {
        if !self.is_starting() {
            return Err(GameError::InvalidState("Game start was not claimed".into()));
        }
        let players: Vec<UserId> = self.record.participants().iter().copied().collect();
        if layout.starts.len() < players.len() {
            return Err(GameError::InvalidState(format!(
                "Maze has {} start positions for {} players",
                layout.starts.len(),
                players.len()
            )));
        }

        let MazeLayout { mut grid, starts } = layout;

        // Participants ordered by id take palette slots and starts in order.
        let mut positions = BTreeMap::new();
        let mut colors = BTreeMap::new();
        for (slot, (user, start)) in players.iter().zip(&starts).enumerate() {
            grid.set(*start, CellType::Free);
            positions.insert(*user, *start);
            colors.insert(*user, PlayerColor::PALETTE[slot % PlayerColor::PALETTE.len()]);
        }

        let mut leftovers: Vec<PlayerColor> = PlayerColor::PALETTE
            .iter()
            .skip(players.len())
            .copied()
            .collect();
        leftovers.shuffle(rng);
        let bot_colors = leftovers.into_iter().take(self.record.bot_count()).collect();

        let connected = players.iter().map(|user| (*user, true)).collect();

        self.runtime = Some(SessionRuntime {
            grid,
            positions,
            colors,
            bot_colors,
            connected,
        });
        self.record.mark_started();
        self.start_claimed = false;
        Ok(())
    }

    /// Apply a move on behalf of `player`; ends the game when the finish is
    /// reached
    pub fn apply_move(&mut self, player: UserId, target: Position) -> MoveOutcome {
        if self.retired || self.state() != LifecycleState::Active {
            return MoveOutcome::Rejected(MoveRejection::NotActive);
        }
        let Some(runtime) = self.runtime.as_mut() else {
            return MoveOutcome::Rejected(MoveRejection::NotActive);
        };

        let outcome = try_move(runtime, player, target);
        if let MoveOutcome::Won(_) = outcome {
            self.record.mark_finished(player);
        }
        outcome
    }

    /// Current server-held position of a participant
    pub fn position_of(&self, user: UserId) -> Option<Position> {
        self.runtime.as_ref().and_then(|r| r.position(user))
    }

    /// Update a participant's connection flag during a match. Returns the
    /// previous value, or `None` if the user has no flag (not started, or
    /// not a participant).
    pub fn set_connected(&mut self, user: UserId, connected: bool) -> Option<bool> {
        let runtime = self.runtime.as_mut()?;
        let flag = runtime.connected.get_mut(&user)?;
        Some(std::mem::replace(flag, connected))
    }

    /// Whether every participant of a started match has dropped
    pub fn all_disconnected(&self) -> bool {
        self.runtime
            .as_ref()
            .is_some_and(SessionRuntime::all_disconnected)
    }
}
