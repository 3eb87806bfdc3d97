//! Runtime-only match state

use super::{PlayerColor, UserId};
use crate::maze::{Grid, Position};
use std::collections::BTreeMap;

/// State that exists only while a match is loaded in memory
///
/// Created when a session starts; never persisted.
#[derive(Debug, Clone)]
pub struct SessionRuntime {
    pub(super) grid: Grid,
    pub(super) positions: BTreeMap<UserId, Position>,
    pub(super) colors: BTreeMap<UserId, PlayerColor>,
    pub(super) bot_colors: Vec<PlayerColor>,
    pub(super) connected: BTreeMap<UserId, bool>,
}

impl SessionRuntime {
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn positions(&self) -> &BTreeMap<UserId, Position> {
        &self.positions
    }

    pub fn position(&self, user: UserId) -> Option<Position> {
        self.positions.get(&user).copied()
    }

    pub fn colors(&self) -> &BTreeMap<UserId, PlayerColor> {
        &self.colors
    }

    pub fn bot_colors(&self) -> &[PlayerColor] {
        &self.bot_colors
    }

    pub fn connected(&self) -> &BTreeMap<UserId, bool> {
        &self.connected
    }

    pub fn is_connected(&self, user: UserId) -> bool {
        self.connected.get(&user).copied().unwrap_or(false)
    }

    /// Participant standing on `pos`, if any
    pub fn occupant(&self, pos: Position) -> Option<UserId> {
        self.positions
            .iter()
            .find(|(_, p)| **p == pos)
            .map(|(user, _)| *user)
    }

    /// Whether nobody in the match is still connected
    pub fn all_disconnected(&self) -> bool {
        self.connected.values().all(|c| !c)
    }
}
