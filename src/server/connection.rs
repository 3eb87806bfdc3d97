//! Client connection handling

use crate::game::GameError;
use crate::protocol::{
    deserialize, frame_message, serialize_and_frame, ClientMessage, ProtocolError, ServerMessage,
    PROTOCOL_VERSION,
};
use anyhow::{anyhow, Result};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

/// Identifier of one transport connection
pub type ConnectionId = Uuid;

/// Outbound side of a connected client
#[derive(Debug, Clone)]
pub struct ClientConnection {
    id: ConnectionId,
    sender: mpsc::Sender<ServerMessage>,
    close: Arc<Notify>,
}

impl ClientConnection {
    pub fn new(sender: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            close: Arc::new(Notify::new()),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a message for the writer task
    pub async fn send(&self, msg: ServerMessage) -> Result<()> {
        self.sender
            .send(msg)
            .await
            .map_err(|_| anyhow!("Failed to send message to client {}", self.id))
    }

    /// Queue a message without waiting for space
    pub fn try_send(
        &self,
        msg: ServerMessage,
    ) -> Result<(), mpsc::error::TrySendError<ServerMessage>> {
        self.sender.try_send(msg)
    }

    /// Ask the connection handler to hang up. The request is remembered
    /// until [`ClientConnection::closed`] observes it.
    pub fn close(&self) {
        self.close.notify_one();
    }

    /// Resolves once [`ClientConnection::close`] has been called
    pub async fn closed(&self) {
        self.close.notified().await;
    }
}

/// Read a length-prefixed message from a stream
///
/// Returns `None` on a clean end of stream.
pub async fn read_message<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    max_size: u32,
) -> Result<Option<Vec<u8>>> {
    let mut len_bytes = [0u8; 4];

    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_bytes);
    if len > max_size {
        return Err(ProtocolError::MessageTooLarge {
            size: len,
            max: max_size,
        }
        .into());
    }

    let mut buffer = vec![0u8; len as usize];
    reader.read_exact(&mut buffer).await?;

    Ok(Some(buffer))
}

/// Write a length-prefixed message to a stream
pub async fn write_message<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let framed = frame_message(payload);
    writer.write_all(&framed).await?;
    writer.flush().await?;
    Ok(())
}

/// Task to write outgoing messages to the client
pub async fn client_writer_task(
    mut writer: OwnedWriteHalf,
    mut receiver: mpsc::Receiver<ServerMessage>,
) {
    while let Some(msg) = receiver.recv().await {
        match serialize_and_frame(&msg) {
            Ok(framed) => {
                let written = async {
                    writer.write_all(&framed).await?;
                    writer.flush().await
                };
                if let Err(e) = written.await {
                    tracing::error!("Failed to write message to client: {}", e);
                    break;
                }
            }
            Err(e) => {
                tracing::error!("Failed to serialize message: {}", e);
            }
        }
    }

    tracing::debug!("Client writer task finished");
}

/// Parse a client message from bytes
pub fn parse_client_message(bytes: &[u8]) -> Result<ClientMessage> {
    deserialize(bytes)
}

/// Create a welcome message for a new client
pub fn create_welcome_message(connection_id: ConnectionId) -> ServerMessage {
    ServerMessage::Welcome {
        protocol_version: PROTOCOL_VERSION,
        connection_id,
    }
}

/// Create an error message for the requester
pub fn create_error_message(error: &GameError) -> ServerMessage {
    ServerMessage::GameError {
        kind: error.kind().to_string(),
        message: error.to_string(),
    }
}

pub fn create_ack_message(for_command: &str) -> ServerMessage {
    ServerMessage::Ack {
        for_command: for_command.to_string(),
    }
}
