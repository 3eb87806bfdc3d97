//! Client-side view of the current game

use crate::game::{PlayerColor, SessionId, UserId};
use crate::maze::{CellType, Position};
use crate::protocol::{GameEvent, GameSummary, MatchHistoryEntry, ServerMessage};
use std::collections::BTreeMap;

/// Maze as last broadcast by the server
#[derive(Debug, Clone, Default)]
pub struct BoardView {
    pub rows: Vec<Vec<u8>>,
    pub positions: BTreeMap<UserId, Position>,
    pub colors: BTreeMap<UserId, PlayerColor>,
}

/// Everything the console needs to draw and to build commands
#[derive(Debug, Clone)]
pub struct App {
    pub user: UserId,
    pub game: Option<SessionId>,
    pub board: Option<BoardView>,
    pub winner: Option<UserId>,
}

impl App {
    pub fn new(user: UserId) -> Self {
        Self {
            user,
            game: None,
            board: None,
            winner: None,
        }
    }

    /// Where the server last placed us
    pub fn my_position(&self) -> Option<Position> {
        self.board
            .as_ref()
            .and_then(|b| b.positions.get(&self.user).copied())
    }

    /// Fold a server message into local state and describe it for the log
    pub fn apply(&mut self, msg: &ServerMessage) -> Option<String> {
        match msg {
            ServerMessage::Welcome {
                protocol_version,
                connection_id,
            } => Some(format!(
                "Connected (protocol v{}, connection {})",
                protocol_version, connection_id
            )),
            ServerMessage::Ack { for_command } => match for_command.as_str() {
                "Hello" | "StartGame" | "AddBot" => None,
                "LeaveLobby" | "CompleteGame" => {
                    self.leave_game();
                    Some("Left the game".to_string())
                }
                other => Some(format!("{} ok", other)),
            },
            ServerMessage::Game { game } => {
                if game.is_participant(self.user) && game.state.is_open() {
                    self.track(game);
                }
                Some(describe_game(game))
            }
            ServerMessage::GameList { games } => {
                if games.is_empty() {
                    return Some("No open games".to_string());
                }
                let lines: Vec<String> = games.iter().map(describe_game).collect();
                Some(lines.join("\n"))
            }
            ServerMessage::MatchHistory { matches } => {
                if matches.is_empty() {
                    return Some("No finished games yet".to_string());
                }
                let lines: Vec<String> = matches.iter().map(describe_match).collect();
                Some(lines.join("\n"))
            }
            ServerMessage::Event(event) => self.apply_event(event),
            ServerMessage::GameError { kind, message } => {
                Some(format!("Error ({}): {}", kind, message))
            }
        }
    }

    fn track(&mut self, game: &GameSummary) {
        if self.game != Some(game.id) {
            self.board = None;
            self.winner = None;
        }
        self.game = Some(game.id);

        // A running match carries the full board, enough to redraw after
        // a reconnect
        match (&game.board, &game.positions) {
            (Some(snapshot), Some(positions)) => {
                self.board = Some(BoardView {
                    rows: snapshot.grid.clone(),
                    positions: positions.clone(),
                    colors: snapshot.player_colors.clone(),
                });
            }
            (None, Some(positions)) => {
                if let Some(board) = self.board.as_mut() {
                    board.positions = positions.clone();
                }
            }
            _ => {}
        }
    }

    fn leave_game(&mut self) {
        self.game = None;
        self.board = None;
        self.winner = None;
    }

    fn apply_event(&mut self, event: &GameEvent) -> Option<String> {
        if self.game.is_some() && self.game != Some(event.game_id()) {
            return None;
        }

        match event {
            GameEvent::PlayerJoined {
                player_id,
                display_name,
                ..
            } => Some(format!("{} (#{}) joined", display_name, player_id)),
            GameEvent::PlayerLeft {
                display_name,
                remaining_players,
                ..
            } => Some(format!(
                "{} left, {} remaining",
                display_name,
                remaining_players.len()
            )),
            GameEvent::BotAdded {
                bot_count,
                total_participants,
                ..
            } => Some(format!(
                "Bot added ({} bots, {} seats taken)",
                bot_count, total_participants
            )),
            GameEvent::GameStarted {
                game_id,
                grid,
                player_positions,
                player_colors,
                width,
                height,
                ..
            } => {
                self.game = Some(*game_id);
                self.board = Some(BoardView {
                    rows: grid.clone(),
                    positions: player_positions.clone(),
                    colors: player_colors.clone(),
                });
                let color = player_colors
                    .get(&self.user)
                    .map(PlayerColor::as_str)
                    .unwrap_or("?");
                Some(format!(
                    "Game started on a {}x{} maze. You are {}. Reach the F!",
                    width, height, color
                ))
            }
            GameEvent::PlayerMoved {
                player_id,
                position,
                ..
            } => {
                if let Some(board) = self.board.as_mut() {
                    board.positions.insert(*player_id, *position);
                }
                None
            }
            GameEvent::PlayerDisconnected { player_id, .. } => {
                Some(format!("Player #{} disconnected", player_id))
            }
            GameEvent::PlayerReconnected { player_id, .. } => {
                Some(format!("Player #{} reconnected", player_id))
            }
            GameEvent::GameOver {
                winner_id,
                final_positions,
                ..
            } => {
                self.winner = Some(*winner_id);
                if let Some(board) = self.board.as_mut() {
                    board.positions = final_positions.clone();
                }
                if *winner_id == self.user {
                    Some("You reached the finish. You win!".to_string())
                } else {
                    Some(format!("Player #{} won the race", winner_id))
                }
            }
        }
    }

    /// Draw the board as text: `#` wall, `F` finish, player initials by
    /// colour, `@` for ourselves
    pub fn render(&self) -> Option<String> {
        let board = self.board.as_ref()?;
        let mut out = String::new();

        for (y, row) in board.rows.iter().enumerate() {
            for (x, code) in row.iter().enumerate() {
                let pos = Position::new(x as i32, y as i32);
                let occupant = board
                    .positions
                    .iter()
                    .find(|(_, p)| **p == pos)
                    .map(|(id, _)| *id);
                let glyph = match occupant {
                    Some(id) if id == self.user => '@',
                    Some(id) => board
                        .colors
                        .get(&id)
                        .and_then(|c| c.as_str().chars().next())
                        .map(|c| c.to_ascii_uppercase())
                        .unwrap_or('P'),
                    None => match CellType::from_code(i64::from(*code)) {
                        Some(CellType::Wall) => '#',
                        Some(CellType::Finish) => 'F',
                        _ => ' ',
                    },
                };
                out.push(glyph);
            }
            out.push('\n');
        }

        Some(out)
    }
}

fn describe_game(game: &GameSummary) -> String {
    let players: Vec<&str> = game
        .players
        .iter()
        .map(|p| p.display_name.as_str())
        .collect();
    format!(
        "{} '{}' [{:?}] {}/{} seats: {}{}",
        game.id,
        game.name,
        game.state,
        game.total_participants(),
        game.max_players,
        players.join(", "),
        if game.bot_count > 0 {
            format!(" +{} bots", game.bot_count)
        } else {
            String::new()
        }
    )
}

fn describe_match(entry: &MatchHistoryEntry) -> String {
    let ended = entry
        .ended_at
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{}  '{}'  {}  with {}",
        ended,
        entry.name,
        if entry.won_by_user { "won" } else { "lost" },
        entry.participants.join(", ")
    )
}
