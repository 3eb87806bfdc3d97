//! Command handling for client control commands (prefixed with `:`)

use crate::client::app::App;
use crate::client::input::Direction;
use crate::game::SessionId;
use crate::maze::Position;
use crate::protocol::ClientMessage;

pub enum CommandResult {
    /// Send these messages to the server
    Send(Vec<ClientMessage>),
    /// Show a line locally
    Print(String),
    Exit,
}

const HELP: &str = "\
Commands:
  :create <name>    create a game and take a seat
  :list             list open games
  :join <id>        join a game
  :show [id]        show a game (defaults to the current one)
  :bot              add a bot to the current lobby
  :start            start the current game
  :leave            leave the current lobby
  :complete         leave a finished game
  :history          your finished games
  :map              redraw the maze
  :quit             exit
Moves: w/a/s/d, h/j/k/l, up/down/left/right, or a run such as 'ddsd'";

/// Translate a control command into protocol messages
pub fn handle_control_command(command: &str, args: &[String], app: &App) -> CommandResult {
    match command {
        "help" | "h" | "?" => CommandResult::Print(HELP.to_string()),
        "quit" | "q" | "exit" => CommandResult::Exit,
        "create" | "new" => {
            if args.is_empty() {
                return CommandResult::Print("Usage: :create <name>".to_string());
            }
            send(ClientMessage::CreateGame {
                name: args.join(" "),
            })
        }
        "list" | "ls" => send(ClientMessage::ListGames),
        "join" => match args.first().map(|s| s.parse::<SessionId>()) {
            Some(Ok(game_id)) => send(ClientMessage::JoinGame { game_id }),
            Some(Err(_)) => CommandResult::Print(format!("'{}' is not a game id", args[0])),
            None => CommandResult::Print("Usage: :join <id>".to_string()),
        },
        "show" | "get" => {
            let target = match args.first() {
                Some(raw) => match raw.parse::<SessionId>() {
                    Ok(id) => Some(id),
                    Err(_) => return CommandResult::Print(format!("'{}' is not a game id", raw)),
                },
                None => app.game,
            };
            match target {
                Some(game_id) => send(ClientMessage::GetGame { game_id }),
                None => CommandResult::Print("You are not in a game".to_string()),
            }
        }
        "bot" => current(app, |game_id| ClientMessage::AddBot { game_id }),
        "start" => current(app, |game_id| ClientMessage::StartGame { game_id }),
        "leave" => current(app, |game_id| ClientMessage::LeaveLobby { game_id }),
        "complete" | "done" => current(app, |game_id| ClientMessage::CompleteGame { game_id }),
        "history" => send(ClientMessage::MatchHistory),
        "map" => match app.render() {
            Some(board) => CommandResult::Print(board),
            None => CommandResult::Print("No game in progress".to_string()),
        },
        other => CommandResult::Print(format!("Unknown command ':{}'. Try :help", other)),
    }
}

/// Build move messages for a run of steps, chaining from our last known
/// position. The server rejects any step that turns out illegal.
pub fn moves_for(app: &App, steps: &[Direction]) -> CommandResult {
    let (Some(game_id), Some(mut current)) = (app.game, app.my_position()) else {
        return CommandResult::Print("No game in progress".to_string());
    };

    let mut messages = Vec::with_capacity(steps.len());
    for step in steps {
        let (dx, dy) = step.delta();
        let target = Position::new(current.x + dx, current.y + dy);
        messages.push(ClientMessage::MovePlayer {
            game_id,
            x: target.x,
            y: target.y,
            current_x: current.x,
            current_y: current.y,
        });
        current = target;
    }
    CommandResult::Send(messages)
}

fn send(msg: ClientMessage) -> CommandResult {
    CommandResult::Send(vec![msg])
}

fn current(app: &App, build: impl FnOnce(SessionId) -> ClientMessage) -> CommandResult {
    match app.game {
        Some(game_id) => send(build(game_id)),
        None => CommandResult::Print("You are not in a game".to_string()),
    }
}
