//! Server module - TCP listener, connection handling and the session gateway

mod connection;
mod gateway;
mod listener;
mod registry;

pub use connection::{read_message, write_message, ClientConnection, ConnectionId};
pub use gateway::Gateway;
pub use listener::ServerListener;
pub use registry::UserProfile;
