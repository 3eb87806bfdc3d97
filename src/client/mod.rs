//! Client - connection to a game server and the interactive console

mod app;
mod commands;
mod input;

pub use app::{App, BoardView};
pub use input::{parse_input, Direction, ParsedInput};

use crate::client::commands::{handle_control_command, moves_for, CommandResult};
use crate::game::UserId;
use crate::protocol::{
    check_version_compatibility, deserialize, serialize, ClientMessage, ServerMessage,
    MAX_MESSAGE_SIZE, PROTOCOL_VERSION,
};
use crate::server::{read_message, write_message};
use anyhow::{anyhow, bail, Context, Result};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A connected, identified game client
///
/// Messages that arrive while [`GameClient::request`] waits for its reply
/// are kept and handed out first by [`GameClient::recv`] and friends.
pub struct GameClient {
    writer: OwnedWriteHalf,
    incoming: mpsc::Receiver<ServerMessage>,
    pending: VecDeque<ServerMessage>,
    reader_task: JoinHandle<()>,
    user: UserId,
}

impl GameClient {
    /// Connect, wait for the welcome and identify as `user`
    pub async fn connect(addr: &str, user: UserId, display_name: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("Failed to connect to {}", addr))?;
        stream.set_nodelay(true)?;
        let (mut reader, writer) = stream.into_split();

        let (tx, incoming) = mpsc::channel(256);
        let reader_task = tokio::spawn(async move {
            loop {
                match read_message(&mut reader, MAX_MESSAGE_SIZE).await {
                    Ok(Some(data)) => match deserialize::<ServerMessage>(&data) {
                        Ok(msg) => {
                            if tx.send(msg).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::error!("Failed to deserialize: {}", e),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!("Connection error: {}", e);
                        break;
                    }
                }
            }
        });

        let mut client = Self {
            writer,
            incoming,
            pending: VecDeque::new(),
            reader_task,
            user,
        };

        let welcome = client
            .wait_for(Duration::from_secs(5), |m| {
                matches!(m, ServerMessage::Welcome { .. })
            })
            .await?;
        if let ServerMessage::Welcome {
            protocol_version,
            connection_id,
        } = welcome
        {
            check_version_compatibility(PROTOCOL_VERSION, protocol_version)?;
            tracing::debug!("Connected as connection {}", connection_id);
        }

        client
            .send(&ClientMessage::Hello {
                protocol_version: PROTOCOL_VERSION,
                user_id: user,
                display_name: display_name.to_string(),
                profile_image_url: None,
            })
            .await?;
        // A returning player gets a snapshot of their game before the ack
        let reply = client
            .await_reply(Duration::from_secs(5), |m| {
                matches!(m, ServerMessage::Ack { for_command } if for_command == "Hello")
                    || matches!(m, ServerMessage::GameError { .. })
            })
            .await?;
        match reply {
            ServerMessage::GameError { message, .. } => bail!("Handshake rejected: {}", message),
            _ => Ok(client),
        }
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    pub async fn send(&mut self, msg: &ClientMessage) -> Result<()> {
        write_message(&mut self.writer, &serialize(msg)?).await
    }

    /// Next message from the server, or `None` once the connection closed
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        if let Some(msg) = self.pending.pop_front() {
            return Some(msg);
        }
        self.incoming.recv().await
    }

    /// Next message within `timeout`
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<ServerMessage> {
        if let Some(msg) = self.pending.pop_front() {
            return Ok(msg);
        }
        self.recv_incoming(timeout).await
    }

    async fn recv_incoming(&mut self, timeout: Duration) -> Result<ServerMessage> {
        tokio::time::timeout(timeout, self.incoming.recv())
            .await
            .map_err(|_| anyhow!("Timed out waiting for a server message"))?
            .ok_or_else(|| anyhow!("Connection closed"))
    }

    /// Read fresh messages until one matches `pred`, keeping the rest for
    /// later
    async fn await_reply<F>(&mut self, timeout: Duration, mut pred: F) -> Result<ServerMessage>
    where
        F: FnMut(&ServerMessage) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let msg = self.recv_incoming(remaining).await?;
            if pred(&msg) {
                return Ok(msg);
            }
            self.pending.push_back(msg);
        }
    }

    /// Skip messages until one matches `pred`; skipped messages are dropped
    pub async fn wait_for<F>(&mut self, timeout: Duration, mut pred: F) -> Result<ServerMessage>
    where
        F: FnMut(&ServerMessage) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let msg = self.recv_timeout(remaining).await?;
            if pred(&msg) {
                return Ok(msg);
            }
        }
    }

    /// Send a command and wait for its direct reply (`Ack`, `Game`,
    /// `GameList`, `MatchHistory` or `GameError`). Broadcasts that arrive
    /// first are kept for [`GameClient::recv`].
    pub async fn request(&mut self, msg: &ClientMessage) -> Result<ServerMessage> {
        self.send(msg).await?;
        self.await_reply(Duration::from_secs(10), |m| {
            !matches!(m, ServerMessage::Event(_) | ServerMessage::Welcome { .. })
        })
        .await
    }
}

impl Drop for GameClient {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

/// Interactive console: reads commands from stdin and prints server
/// updates as they arrive
pub async fn play(addr: &str, user: UserId, display_name: &str) -> Result<()> {
    let mut client = GameClient::connect(addr, user, display_name).await?;
    let mut app = App::new(user);
    println!(
        "gridrunners: connected to {} as {} (#{}). Type :help for commands.",
        addr, display_name, user
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let result = match parse_input(&line) {
                    Ok(ParsedInput::Empty) => continue,
                    Ok(ParsedInput::Move(step)) => moves_for(&app, &[step]),
                    Ok(ParsedInput::Path(steps)) => moves_for(&app, &steps),
                    Ok(ParsedInput::ControlCommand { command, args }) => {
                        handle_control_command(&command, &args, &app)
                    }
                    Err(e) => CommandResult::Print(e.to_string()),
                };
                match result {
                    CommandResult::Send(messages) => {
                        for msg in &messages {
                            client.send(msg).await?;
                        }
                    }
                    CommandResult::Print(text) => println!("{}", text),
                    CommandResult::Exit => break,
                }
            }

            msg = client.recv() => {
                let Some(msg) = msg else {
                    println!("Server closed the connection");
                    break;
                };
                let redraw = matches!(
                    &msg,
                    ServerMessage::Game { .. }
                        | ServerMessage::Event(crate::protocol::GameEvent::GameStarted { .. })
                        | ServerMessage::Event(crate::protocol::GameEvent::PlayerMoved { .. })
                        | ServerMessage::Event(crate::protocol::GameEvent::GameOver { .. })
                );
                if let Some(text) = app.apply(&msg) {
                    println!("{}", text);
                }
                if redraw {
                    if let Some(board) = app.render() {
                        println!("{}", board);
                    }
                }
            }
        }
    }

    Ok(())
}
