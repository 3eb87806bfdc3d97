//! gridrunners - a multiplayer maze race server
//!
//! This crate provides the core functionality for gridrunners, including:
//! - Maze generation, locally or through a remote generator service
//! - Game sessions: lobbies, match lifecycle and move validation
//! - Session persistence
//! - Client-server protocol and the TCP game server
//!
//! # Architecture
//!
//! gridrunners uses a client-server model where:
//! - The server (`gridrunners-server`) owns every session and is the sole
//!   authority on positions and outcomes
//! - The client (`gridrunners`) sends commands and renders broadcasts
//! - Communication happens over TCP with length-prefixed MessagePack frames

pub mod client;
pub mod config;
pub mod game;
pub mod maze;
pub mod protocol;
pub mod server;
pub mod store;
