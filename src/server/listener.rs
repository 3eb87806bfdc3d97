//! TCP listener and server main loop

use super::connection::{
    client_writer_task, create_error_message, create_welcome_message, parse_client_message,
    read_message, ClientConnection,
};
use super::gateway::Gateway;
use crate::config::ServerConfig;
use crate::game::GameError;
use crate::protocol::ServerMessage;
use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Accepts game clients and hands their messages to the gateway
pub struct ServerListener {
    listener: TcpListener,
    gateway: Arc<Gateway>,
    max_message_size: u32,
    client_queue: usize,
}

impl ServerListener {
    /// Bind the configured address
    pub async fn bind(config: &ServerConfig, gateway: Arc<Gateway>) -> Result<Self> {
        let listener = TcpListener::bind(&config.bind).await?;
        tracing::info!("Server listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            gateway,
            max_message_size: config.max_message_size,
            client_queue: config.client_queue,
        })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Run the accept loop until a shutdown signal arrives
    pub async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Shutdown signal received");
                    break;
                }

                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            let gateway = Arc::clone(&self.gateway);
                            let max_size = self.max_message_size;
                            let queue = self.client_queue;
                            tokio::spawn(async move {
                                if let Err(e) = handle_client(stream, gateway, max_size, queue).await {
                                    tracing::error!("Client {} error: {}", addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// Handle a single client connection
async fn handle_client(
    stream: TcpStream,
    gateway: Arc<Gateway>,
    max_message_size: u32,
    client_queue: usize,
) -> Result<()> {
    stream.set_nodelay(true)?;
    let (mut reader, writer) = stream.into_split();

    let (tx, rx) = mpsc::channel::<ServerMessage>(client_queue);
    let client = ClientConnection::new(tx);
    let client_id = client.id();

    tracing::info!("Client connected: {}", client_id);

    let writer_handle = tokio::spawn(client_writer_task(writer, rx));
    client.send(create_welcome_message(client_id)).await?;
    gateway.connect(client.clone()).await;

    let mut kicked = false;
    loop {
        let next = tokio::select! {
            read = read_message(&mut reader, max_message_size) => read,
            _ = client.closed() => {
                tracing::warn!("Client {} fell behind on broadcasts, disconnecting", client_id);
                kicked = true;
                break;
            }
        };

        match next {
            Ok(Some(bytes)) => match parse_client_message(&bytes) {
                Ok(msg) => {
                    tracing::trace!("{} from {}", msg.command_name(), client_id);
                    if let Some(response) = gateway.handle(client_id, msg).await {
                        if let Err(e) = client.send(response).await {
                            tracing::error!("Failed to send response: {}", e);
                            break;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to parse message from {}: {}", client_id, e);
                    let error = GameError::ValidationFailed(format!("Invalid message: {}", e));
                    let _ = client.send(create_error_message(&error)).await;
                }
            },
            Ok(None) => {
                tracing::info!("Client disconnected: {}", client_id);
                break;
            }
            Err(e) => {
                tracing::error!("Error reading from client {}: {}", client_id, e);
                break;
            }
        }
    }

    gateway.disconnect(client_id).await;

    drop(client);
    if kicked {
        // The peer is not reading; flushing its backlog could block forever
        writer_handle.abort();
    } else {
        // Let queued messages drain before the socket closes
        let _ = writer_handle.await;
    }

    tracing::info!("Client handler finished: {}", client_id);

    Ok(())
}
