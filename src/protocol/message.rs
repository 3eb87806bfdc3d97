//! Message types for the gridrunners protocol

use crate::game::{LifecycleState, PlayerColor, SessionId, UserId};
use crate::maze::Position;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Handshake: protocol version and the caller's identity
    Hello {
        protocol_version: u32,
        user_id: UserId,
        display_name: String,
        #[serde(default)]
        profile_image_url: Option<String>,
    },

    /// Create a lobby; the creator is seated automatically
    CreateGame { name: String },

    /// Lobbies the caller could join
    ListGames,

    GetGame { game_id: SessionId },

    JoinGame { game_id: SessionId },

    LeaveLobby { game_id: SessionId },

    AddBot { game_id: SessionId },

    StartGame { game_id: SessionId },

    /// Step to `(x, y)`. `current_x`/`current_y` is where the client
    /// believes it stands; the server position wins on mismatch.
    MovePlayer {
        game_id: SessionId,
        x: i32,
        y: i32,
        current_x: i32,
        current_y: i32,
    },

    /// Client-side hint that a game ended; the server decides the outcome
    CompleteGame { game_id: SessionId },

    /// Finished matches the caller took part in
    MatchHistory,
}

impl ClientMessage {
    /// Name used in acknowledgements and logs
    pub fn command_name(&self) -> &'static str {
        match self {
            ClientMessage::Hello { .. } => "Hello",
            ClientMessage::CreateGame { .. } => "CreateGame",
            ClientMessage::ListGames => "ListGames",
            ClientMessage::GetGame { .. } => "GetGame",
            ClientMessage::JoinGame { .. } => "JoinGame",
            ClientMessage::LeaveLobby { .. } => "LeaveLobby",
            ClientMessage::AddBot { .. } => "AddBot",
            ClientMessage::StartGame { .. } => "StartGame",
            ClientMessage::MovePlayer { .. } => "MovePlayer",
            ClientMessage::CompleteGame { .. } => "CompleteGame",
            ClientMessage::MatchHistory => "MatchHistory",
        }
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Handshake response
    Welcome {
        protocol_version: u32,
        connection_id: Uuid,
    },

    /// Command accepted
    Ack { for_command: String },

    /// Snapshot of a single game
    Game { game: GameSummary },

    GameList { games: Vec<GameSummary> },

    /// Newest first
    MatchHistory { matches: Vec<MatchHistoryEntry> },

    /// Broadcast to everyone in a game
    Event(GameEvent),

    /// A command failed; sent to the requester only
    GameError { kind: String, message: String },
}

/// Events broadcast to a game's group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all_fields = "camelCase")]
pub enum GameEvent {
    PlayerJoined {
        game_id: SessionId,
        player_id: UserId,
        display_name: String,
        profile_image_url: Option<String>,
    },

    PlayerLeft {
        game_id: SessionId,
        player_id: UserId,
        display_name: String,
        remaining_players: Vec<PlayerRef>,
    },

    BotAdded {
        game_id: SessionId,
        bot_count: usize,
        total_participants: usize,
    },

    /// Full initial match state. `grid` is indexed `[y][x]` with
    /// Wall=0, Free=1, Finish=2.
    GameStarted {
        game_id: SessionId,
        grid: Vec<Vec<u8>>,
        player_positions: BTreeMap<UserId, Position>,
        players: Vec<PlayerRef>,
        player_colors: BTreeMap<UserId, PlayerColor>,
        bot_colors: Vec<PlayerColor>,
        bot_count: usize,
        width: usize,
        height: usize,
    },

    PlayerMoved {
        game_id: SessionId,
        player_id: UserId,
        position: Position,
    },

    PlayerDisconnected {
        game_id: SessionId,
        player_id: UserId,
        connected_players: BTreeMap<UserId, bool>,
    },

    PlayerReconnected {
        game_id: SessionId,
        player_id: UserId,
        connected_players: BTreeMap<UserId, bool>,
    },

    GameOver {
        game_id: SessionId,
        winner_id: UserId,
        final_positions: BTreeMap<UserId, Position>,
    },
}

impl GameEvent {
    pub fn game_id(&self) -> SessionId {
        match self {
            GameEvent::PlayerJoined { game_id, .. }
            | GameEvent::PlayerLeft { game_id, .. }
            | GameEvent::BotAdded { game_id, .. }
            | GameEvent::GameStarted { game_id, .. }
            | GameEvent::PlayerMoved { game_id, .. }
            | GameEvent::PlayerDisconnected { game_id, .. }
            | GameEvent::PlayerReconnected { game_id, .. }
            | GameEvent::GameOver { game_id, .. } => *game_id,
        }
    }
}

/// A player as listed in events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRef {
    pub id: UserId,
    pub display_name: String,
}

/// A seated player with profile details
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    pub id: UserId,
    pub display_name: String,
    pub profile_image_url: Option<String>,
    /// Present once the match has started
    pub connected: Option<bool>,
}

/// Public view of a game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSummary {
    pub id: SessionId,
    pub name: String,
    pub state: LifecycleState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub winner_id: Option<UserId>,
    pub players: Vec<PlayerInfo>,
    pub bot_count: usize,
    pub max_players: usize,
    /// Authoritative positions once the match has started
    pub positions: Option<BTreeMap<UserId, Position>>,
    /// Maze and colours once the match has started
    #[serde(default)]
    pub board: Option<BoardSnapshot>,
}

impl GameSummary {
    pub fn total_participants(&self) -> usize {
        self.players.len() + self.bot_count
    }

    pub fn is_participant(&self, user: UserId) -> bool {
        self.players.iter().any(|p| p.id == user)
    }
}

/// Everything a client needs to redraw a running match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardSnapshot {
    /// Indexed `[y][x]`, same codes as `GameStarted`
    pub grid: Vec<Vec<u8>>,
    pub width: usize,
    pub height: usize,
    pub player_colors: BTreeMap<UserId, PlayerColor>,
    pub bot_colors: Vec<PlayerColor>,
}

/// One finished match from a player's point of view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchHistoryEntry {
    pub game_id: SessionId,
    pub name: String,
    pub state: LifecycleState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub won_by_user: bool,
    /// Display names of everyone who played, then one "Bot" per bot
    pub participants: Vec<String>,
}
