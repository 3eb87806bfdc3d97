//! Persisted session metadata

use super::{GameError, LifecycleState, SessionId, UserId, NAME_MAX_LEN, NAME_MIN_LEN};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The part of a session that survives restarts
///
/// Grid, positions, colors and connection flags are deliberately absent;
/// they live in [`super::SessionRuntime`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    id: SessionId,
    name: String,
    state: LifecycleState,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    winner_id: Option<UserId>,
    participants: BTreeSet<UserId>,
    #[serde(default)]
    bot_count: usize,
}

impl SessionRecord {
    /// Create an empty lobby record after validating the name
    pub fn new(name: &str) -> Result<Self, GameError> {
        let name = name.trim();
        let len = name.chars().count();
        if !(NAME_MIN_LEN..=NAME_MAX_LEN).contains(&len) {
            return Err(GameError::ValidationFailed(format!(
                "Game name must be between {} and {} characters",
                NAME_MIN_LEN, NAME_MAX_LEN
            )));
        }

        Ok(Self {
            id: SessionId::new(),
            name: name.to_string(),
            state: LifecycleState::Lobby,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            winner_id: None,
            participants: BTreeSet::new(),
            bot_count: 0,
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn winner_id(&self) -> Option<UserId> {
        self.winner_id
    }

    /// Seated users, ordered by identifier
    pub fn participants(&self) -> &BTreeSet<UserId> {
        &self.participants
    }

    pub fn is_participant(&self, user: UserId) -> bool {
        self.participants.contains(&user)
    }

    pub fn bot_count(&self) -> usize {
        self.bot_count
    }

    /// Seated users plus bots
    pub fn total_participants(&self) -> usize {
        self.participants.len() + self.bot_count
    }

    pub(super) fn seat(&mut self, user: UserId) -> bool {
        self.participants.insert(user)
    }

    pub(super) fn unseat(&mut self, user: UserId) -> bool {
        self.participants.remove(&user)
    }

    pub(super) fn add_bot(&mut self) {
        self.bot_count += 1;
    }

    pub(super) fn mark_started(&mut self) {
        if self.state == LifecycleState::Lobby {
            self.state = LifecycleState::Active;
            self.started_at = Some(Utc::now());
        }
    }

    /// Transition to Finished. Returns false if the game was not active.
    pub(super) fn mark_finished(&mut self, winner: UserId) -> bool {
        if self.state != LifecycleState::Active || self.winner_id.is_some() {
            return false;
        }
        self.state = LifecycleState::Finished;
        self.winner_id = Some(winner);
        self.ended_at = Some(Utc::now());
        true
    }
}
