//! Broadcast gateway - dispatches client commands to sessions and relays
//! the resulting events
//!
//! Every command that changes a session runs under that session's mutex.
//! Persisted changes are written to the store before anything is
//! broadcast; when the write fails the in-memory change is rolled back and
//! only the requester hears about it.

use super::connection::{create_ack_message, create_error_message, ClientConnection, ConnectionId};
use super::registry::{deliver, Registry, UserProfile};
use crate::config::GameConfig;
use crate::game::{
    GameError, LifecycleState, MoveOutcome, Session, SessionId, SessionRecord, SessionRuntime,
    UserId,
};
use crate::maze::{MazeProvider, Position};
use crate::protocol::{
    check_version_compatibility, BoardSnapshot, ClientMessage, GameEvent, GameSummary,
    MatchHistoryEntry, PlayerInfo, PlayerRef, ServerMessage, PROTOCOL_VERSION,
};
use crate::store::{SessionStore, StoreError};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

type SessionHandle = Arc<Mutex<Session>>;

/// Routes client commands to sessions
pub struct Gateway {
    registry: RwLock<Registry>,
    store: Arc<dyn SessionStore>,
    mazes: MazeProvider,
    game: GameConfig,
}

impl Gateway {
    pub fn new(store: Arc<dyn SessionStore>, mazes: MazeProvider, game: GameConfig) -> Self {
        Self {
            registry: RwLock::new(Registry::new()),
            store,
            mazes,
            game,
        }
    }

    /// Reload lobbies from the store
    ///
    /// Active matches cannot be resumed because their runtime state was
    /// never persisted; those records are removed. Returns the number of
    /// lobbies restored.
    pub async fn restore(&self) -> Result<usize, StoreError> {
        let records = self.store.list().await?;
        let mut restored = 0;

        for record in records {
            match record.state() {
                LifecycleState::Lobby => {
                    let id = record.id();
                    let mut registry = self.registry.write().await;
                    for user in record.participants() {
                        if let Err(e) = registry.try_seat(*user, id) {
                            tracing::warn!("Restored game {} for user {}: {}", id, user, e);
                        }
                    }
                    registry.insert_session(Session::restore(record, self.game.rules()));
                    restored += 1;
                }
                LifecycleState::Active => {
                    tracing::warn!(
                        "Dropping game {} ('{}'): matches in progress cannot be resumed",
                        record.id(),
                        record.name()
                    );
                    self.store.delete(record.id()).await?;
                }
                LifecycleState::Finished => {}
            }
        }

        tracing::info!("Restored {} lobbies from storage", restored);
        Ok(restored)
    }

    /// Number of sessions held in memory
    pub async fn session_count(&self) -> usize {
        self.registry.read().await.session_count()
    }

    /// Register a freshly accepted connection
    pub async fn connect(&self, client: ClientConnection) {
        self.registry.write().await.add_connection(client);
    }

    /// Process one client message and return the reply for the requester
    ///
    /// Failures become a `GameError` message for the requester only. Moves
    /// have no reply; their outcome is the broadcast.
    pub async fn handle(&self, conn: ConnectionId, msg: ClientMessage) -> Option<ServerMessage> {
        let command = msg.command_name();
        match self.dispatch(conn, msg).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::debug!("{} from {} failed: {}", command, conn, e);
                Some(create_error_message(&e))
            }
        }
    }

    async fn dispatch(
        &self,
        conn: ConnectionId,
        msg: ClientMessage,
    ) -> Result<Option<ServerMessage>, GameError> {
        let msg = match msg {
            ClientMessage::Hello {
                protocol_version,
                user_id,
                display_name,
                profile_image_url,
            } => {
                let profile = UserProfile {
                    display_name,
                    profile_image_url,
                };
                return self
                    .hello(conn, protocol_version, user_id, profile)
                    .await
                    .map(Some);
            }
            other => other,
        };

        let user = self
            .registry
            .read()
            .await
            .user_of(conn)
            .ok_or_else(|| GameError::Forbidden("Say Hello before sending commands".into()))?;

        let reply = match msg {
            ClientMessage::Hello { .. } => None,
            ClientMessage::CreateGame { name } => Some(self.create_game(user, &name).await?),
            ClientMessage::ListGames => Some(self.list_games(user).await),
            ClientMessage::GetGame { game_id } => Some(self.get_game(game_id).await?),
            ClientMessage::JoinGame { game_id } => Some(self.join_game(user, game_id).await?),
            ClientMessage::LeaveLobby { game_id } => Some(self.leave_lobby(user, game_id).await?),
            ClientMessage::AddBot { game_id } => Some(self.add_bot(user, game_id).await?),
            ClientMessage::StartGame { game_id } => Some(self.start_game(user, game_id).await?),
            ClientMessage::MovePlayer {
                game_id,
                x,
                y,
                current_x,
                current_y,
            } => {
                let claimed = Position::new(current_x, current_y);
                self.move_player(user, game_id, Position::new(x, y), claimed)
                    .await?;
                None
            }
            ClientMessage::CompleteGame { game_id } => {
                Some(self.complete_game(user, game_id).await?)
            }
            ClientMessage::MatchHistory => Some(self.match_history(user).await?),
        };
        Ok(reply)
    }

    async fn session_handle(&self, id: SessionId) -> Result<SessionHandle, GameError> {
        let handle = self.registry.read().await.session(id);
        handle.ok_or_else(|| GameError::NotFound("Game not found".into()))
    }

    async fn broadcast(&self, id: SessionId, event: GameEvent) {
        let targets = self.registry.read().await.group_senders(id);
        deliver(&targets, event);
    }

    async fn hello(
        &self,
        conn: ConnectionId,
        protocol_version: u32,
        user: UserId,
        profile: UserProfile,
    ) -> Result<ServerMessage, GameError> {
        check_version_compatibility(protocol_version, PROTOCOL_VERSION)
            .map_err(|e| GameError::ValidationFailed(e.to_string()))?;

        let seat = {
            let mut registry = self.registry.write().await;
            registry.bind_user(conn, user, profile)?;
            registry.seat_of(user)
        };
        tracing::info!("Connection {} identified as user {}", conn, user);

        let Some(id) = seat else {
            return Ok(create_ack_message("Hello"));
        };
        let handle = self.registry.read().await.session(id);
        let Some(handle) = handle else {
            return Ok(create_ack_message("Hello"));
        };

        let mut session = handle.lock().await;
        if session.is_retired() {
            return Ok(create_ack_message("Hello"));
        }
        self.registry.write().await.subscribe(conn, id);

        if session.state() == LifecycleState::Active
            && session.set_connected(user, true) == Some(false)
        {
            let connected_players = connected_map(session.runtime());
            tracing::info!("User {} reconnected to game {}", user, id);
            self.broadcast(
                id,
                GameEvent::PlayerReconnected {
                    game_id: id,
                    player_id: user,
                    connected_players,
                },
            )
            .await;
        }

        // Queued under the session lock so no later broadcast can overtake it
        let snapshot = {
            let registry = self.registry.read().await;
            registry
                .sender(conn)
                .map(|client| (client, summarize(&session, &registry)))
        };
        if let Some((client, game)) = snapshot {
            if client.try_send(ServerMessage::Game { game }).is_err() {
                client.close();
            }
        }

        Ok(create_ack_message("Hello"))
    }

    async fn create_game(&self, user: UserId, name: &str) -> Result<ServerMessage, GameError> {
        let mut session = Session::create(name, self.game.rules())?;
        session.join(user)?;
        let id = session.id();

        self.registry.write().await.try_seat(user, id)?;

        if let Err(e) = self.store.save(session.record()).await {
            tracing::error!("Failed to save new game {}: {}", id, e);
            self.registry.write().await.unseat(user, id);
            return Err(e.into());
        }

        let summary = {
            let mut registry = self.registry.write().await;
            let summary = summarize(&session, &registry);
            registry.insert_session(session);
            registry.subscribe_user(user, id);
            registry.evict_idle_finished();
            summary
        };

        tracing::info!("User {} created game {} ('{}')", user, id, summary.name);
        Ok(ServerMessage::Game { game: summary })
    }

    /// Lobbies the user is not part of, newest first
    async fn list_games(&self, user: UserId) -> ServerMessage {
        let handles = self.registry.read().await.sessions();
        let mut games = Vec::new();

        for handle in handles {
            let session = handle.lock().await;
            if session.is_retired()
                || session.state() != LifecycleState::Lobby
                || session.record().is_participant(user)
            {
                continue;
            }
            let registry = self.registry.read().await;
            games.push(summarize(&session, &registry));
        }

        games.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        ServerMessage::GameList { games }
    }

    async fn get_game(&self, id: SessionId) -> Result<ServerMessage, GameError> {
        let handle = self.registry.read().await.session(id);
        if let Some(handle) = handle {
            let session = handle.lock().await;
            if !session.is_retired() {
                let registry = self.registry.read().await;
                return Ok(ServerMessage::Game {
                    game: summarize(&session, &registry),
                });
            }
        }

        // Evicted games are still readable from the store
        let record = self.store.load(id).await.map_err(GameError::from)?;
        let record = record.ok_or_else(|| GameError::NotFound("Game not found".into()))?;
        let registry = self.registry.read().await;
        Ok(ServerMessage::Game {
            game: summarize_record(&record, None, self.game.max_players, &registry),
        })
    }

    async fn join_game(&self, user: UserId, id: SessionId) -> Result<ServerMessage, GameError> {
        let handle = self.session_handle(id).await?;
        let mut session = handle.lock().await;
        let before = session.record().clone();

        let newly_seated = self.registry.write().await.try_seat(user, id)?;
        if let Err(e) = session.join(user) {
            if newly_seated {
                self.registry.write().await.unseat(user, id);
            }
            return Err(e);
        }

        if let Err(e) = self.store.save(session.record()).await {
            tracing::error!("Failed to save game {} after join: {}", id, e);
            session.rollback(before);
            self.registry.write().await.unseat(user, id);
            return Err(e.into());
        }

        let (summary, profile) = {
            let mut registry = self.registry.write().await;
            registry.subscribe_user(user, id);
            registry.evict_idle_finished();
            (summarize(&session, &registry), registry.profile(user))
        };

        tracing::info!("User {} joined game {}", user, id);
        self.broadcast(
            id,
            GameEvent::PlayerJoined {
                game_id: id,
                player_id: user,
                display_name: profile.display_name,
                profile_image_url: profile.profile_image_url,
            },
        )
        .await;

        Ok(ServerMessage::Game { game: summary })
    }

    async fn leave_lobby(&self, user: UserId, id: SessionId) -> Result<ServerMessage, GameError> {
        let handle = self.session_handle(id).await?;
        let mut session = handle.lock().await;
        self.leave_locked(&mut session, user).await?;
        Ok(create_ack_message("LeaveLobby"))
    }

    /// Lobby leave with the session lock held: persists, then broadcasts
    /// `PlayerLeft` or deletes the emptied lobby
    async fn leave_locked(&self, session: &mut Session, user: UserId) -> Result<(), GameError> {
        let id = session.id();
        let before = session.record().clone();
        let outcome = session.leave(user)?;

        if outcome.emptied {
            if let Err(e) = self.store.delete(id).await {
                tracing::error!("Failed to delete empty game {}: {}", id, e);
                session.rollback(before);
                return Err(e.into());
            }
            session.retire();
            self.registry.write().await.remove_session(id);
            tracing::info!("Game {} deleted after its last player left", id);
            return Ok(());
        }

        if let Err(e) = self.store.save(session.record()).await {
            tracing::error!("Failed to save game {} after leave: {}", id, e);
            session.rollback(before);
            return Err(e.into());
        }

        let (profile, remaining_players) = {
            let mut registry = self.registry.write().await;
            registry.unseat(user, id);
            registry.unsubscribe_user(user, id);
            (registry.profile(user), player_refs(session.record(), &registry))
        };

        tracing::info!("User {} left game {}", user, id);
        self.broadcast(
            id,
            GameEvent::PlayerLeft {
                game_id: id,
                player_id: user,
                display_name: profile.display_name,
                remaining_players,
            },
        )
        .await;
        Ok(())
    }

    async fn add_bot(&self, user: UserId, id: SessionId) -> Result<ServerMessage, GameError> {
        let handle = self.session_handle(id).await?;
        let mut session = handle.lock().await;
        let before = session.record().clone();

        let bot_count = session.add_bot(user)?;
        if let Err(e) = self.store.save(session.record()).await {
            tracing::error!("Failed to save game {} after adding a bot: {}", id, e);
            session.rollback(before);
            return Err(e.into());
        }

        tracing::info!("Bot added to game {} by user {}", id, user);
        self.broadcast(
            id,
            GameEvent::BotAdded {
                game_id: id,
                bot_count,
                total_participants: session.record().total_participants(),
            },
        )
        .await;

        Ok(create_ack_message("AddBot"))
    }

    async fn start_game(&self, user: UserId, id: SessionId) -> Result<ServerMessage, GameError> {
        let handle = self.session_handle(id).await?;

        let claim = handle.lock().await.claim_start(user)?;
        tracing::info!(
            "User {} starting game {} with {} players",
            user,
            id,
            claim.players
        );

        // The session lock is released while the maze is produced
        let layout = self
            .mazes
            .layout(self.game.width, self.game.height, claim.players)
            .await;

        let mut session = handle.lock().await;
        if session.is_retired() {
            return Err(GameError::NotFound("Game not found".into()));
        }

        let before = session.record().clone();
        if let Err(e) = session.activate(layout) {
            session.abandon_start();
            return Err(e);
        }
        if let Err(e) = self.store.save(session.record()).await {
            tracing::error!("Failed to save game {} after start: {}", id, e);
            session.rollback(before);
            session.abandon_start();
            return Err(e.into());
        }

        let (event, offline) = {
            let registry = self.registry.read().await;
            let offline: Vec<UserId> = session
                .record()
                .participants()
                .iter()
                .copied()
                .filter(|p| !registry.is_online(*p))
                .collect();
            (game_started(&session, &registry), offline)
        };

        tracing::info!("Game {} started", id);
        self.broadcast(id, event).await;

        // Players who dropped while the maze was being built
        if !offline.is_empty() {
            for player in &offline {
                session.set_connected(*player, false);
            }
            if session.all_disconnected() {
                self.delete_abandoned(&mut session).await;
            } else {
                let connected_players = connected_map(session.runtime());
                for player in offline {
                    self.broadcast(
                        id,
                        GameEvent::PlayerDisconnected {
                            game_id: id,
                            player_id: player,
                            connected_players: connected_players.clone(),
                        },
                    )
                    .await;
                }
            }
        }

        Ok(create_ack_message("StartGame"))
    }

    async fn move_player(
        &self,
        user: UserId,
        id: SessionId,
        target: Position,
        claimed: Position,
    ) -> Result<(), GameError> {
        let handle = self.session_handle(id).await?;
        let mut session = handle.lock().await;

        if let Some(current) = session.position_of(user) {
            if current != claimed {
                tracing::debug!(
                    "User {} in game {} claims {} but stands at {}",
                    user,
                    id,
                    claimed,
                    current
                );
            }
        }

        match session.apply_move(user, target) {
            MoveOutcome::Rejected(reason) => {
                tracing::debug!(
                    "Rejected move of user {} to {} in game {}: {}",
                    user,
                    target,
                    id,
                    reason
                );
            }
            MoveOutcome::Moved(position) => {
                self.broadcast(
                    id,
                    GameEvent::PlayerMoved {
                        game_id: id,
                        player_id: user,
                        position,
                    },
                )
                .await;
            }
            MoveOutcome::Won(position) => {
                self.broadcast(
                    id,
                    GameEvent::PlayerMoved {
                        game_id: id,
                        player_id: user,
                        position,
                    },
                )
                .await;

                // The win stands even if it cannot be persisted
                if let Err(e) = self.store.save(session.record()).await {
                    tracing::error!("Failed to save finished game {}: {}", id, e);
                }
                self.registry.write().await.mark_finished(id);

                let final_positions = session
                    .runtime()
                    .map(|r| r.positions().clone())
                    .unwrap_or_default();
                tracing::info!("Game {} finished, winner {}", id, user);
                self.broadcast(
                    id,
                    GameEvent::GameOver {
                        game_id: id,
                        winner_id: user,
                        final_positions,
                    },
                )
                .await;
            }
        }
        Ok(())
    }

    async fn complete_game(&self, user: UserId, id: SessionId) -> Result<ServerMessage, GameError> {
        let handle = self.session_handle(id).await?;
        let session = handle.lock().await;
        if session.state() != LifecycleState::Finished {
            return Err(GameError::InvalidState("Cannot complete game".into()));
        }

        let mut registry = self.registry.write().await;
        registry.unsubscribe_user(user, id);
        registry.evict_idle_finished();
        tracing::info!("User {} completed game {}", user, id);
        Ok(create_ack_message("CompleteGame"))
    }

    /// Finished matches `user` played in, newest first. Read from the store
    /// so evicted sessions and earlier server runs are included.
    async fn match_history(&self, user: UserId) -> Result<ServerMessage, GameError> {
        let records = self.store.list().await.map_err(GameError::from)?;

        let registry = self.registry.read().await;
        let mut matches: Vec<MatchHistoryEntry> = records
            .iter()
            .filter(|r| r.state() == LifecycleState::Finished && r.is_participant(user))
            .map(|r| history_entry(r, user, &registry))
            .collect();
        matches.sort_by(|a, b| b.ended_at.cmp(&a.ended_at));

        Ok(ServerMessage::MatchHistory { matches })
    }

    /// Apply the disconnect policy once a connection has closed
    ///
    /// Nothing happens while the user still has another live connection.
    pub async fn disconnect(&self, conn: ConnectionId) {
        let (user, seat) = {
            let mut registry = self.registry.write().await;
            let user = registry.remove_connection(conn);
            for id in registry.evict_idle_finished() {
                tracing::debug!("Evicted finished game {}", id);
            }
            match user {
                Some(user) if !registry.is_online(user) => (user, registry.seat_of(user)),
                _ => return,
            }
        };

        let Some(id) = seat else { return };
        let handle = self.registry.read().await.session(id);
        let Some(handle) = handle else { return };
        let mut session = handle.lock().await;
        if session.is_retired() {
            return;
        }

        match session.state() {
            LifecycleState::Lobby if session.is_starting() => {
                tracing::info!("User {} dropped while game {} is starting", user, id);
            }
            LifecycleState::Lobby => {
                if let Err(e) = self.leave_locked(&mut session, user).await {
                    tracing::warn!("Could not remove user {} from game {}: {}", user, id, e);
                }
            }
            LifecycleState::Active => {
                session.set_connected(user, false);
                if session.all_disconnected() {
                    self.delete_abandoned(&mut session).await;
                } else {
                    tracing::info!("User {} disconnected from active game {}", user, id);
                    self.broadcast(
                        id,
                        GameEvent::PlayerDisconnected {
                            game_id: id,
                            player_id: user,
                            connected_players: connected_map(session.runtime()),
                        },
                    )
                    .await;
                }
            }
            LifecycleState::Finished => {
                tracing::debug!("User {} left finished game {}", user, id);
            }
        }
    }

    /// Delete an active match nobody is connected to any more
    async fn delete_abandoned(&self, session: &mut Session) {
        let id = session.id();
        if let Err(e) = self.store.delete(id).await {
            tracing::error!("Failed to delete abandoned game {}: {}", id, e);
        }
        session.retire();
        self.registry.write().await.remove_session(id);
        tracing::info!("Game {} deleted: all players disconnected", id);
    }
}

fn connected_map(runtime: Option<&SessionRuntime>) -> std::collections::BTreeMap<UserId, bool> {
    runtime.map(|r| r.connected().clone()).unwrap_or_default()
}

fn player_refs(record: &SessionRecord, registry: &Registry) -> Vec<PlayerRef> {
    record
        .participants()
        .iter()
        .map(|id| PlayerRef {
            id: *id,
            display_name: registry.profile(*id).display_name,
        })
        .collect()
}

fn game_started(session: &Session, registry: &Registry) -> GameEvent {
    let record = session.record();
    let (grid, positions, colors, bot_colors, width, height) = match session.runtime() {
        Some(runtime) => (
            runtime.grid().to_rows(),
            runtime.positions().clone(),
            runtime.colors().clone(),
            runtime.bot_colors().to_vec(),
            runtime.grid().width(),
            runtime.grid().height(),
        ),
        None => Default::default(),
    };

    GameEvent::GameStarted {
        game_id: record.id(),
        grid,
        player_positions: positions,
        players: player_refs(record, registry),
        player_colors: colors,
        bot_colors,
        bot_count: record.bot_count(),
        width,
        height,
    }
}

fn summarize(session: &Session, registry: &Registry) -> GameSummary {
    summarize_record(
        session.record(),
        session.runtime(),
        session.rules().max_players,
        registry,
    )
}

fn summarize_record(
    record: &SessionRecord,
    runtime: Option<&SessionRuntime>,
    max_players: usize,
    registry: &Registry,
) -> GameSummary {
    let players = record
        .participants()
        .iter()
        .map(|id| {
            let profile = registry.profile(*id);
            PlayerInfo {
                id: *id,
                display_name: profile.display_name,
                profile_image_url: profile.profile_image_url,
                connected: runtime.map(|r| r.is_connected(*id)),
            }
        })
        .collect();

    GameSummary {
        id: record.id(),
        name: record.name().to_string(),
        state: record.state(),
        created_at: record.created_at(),
        started_at: record.started_at(),
        ended_at: record.ended_at(),
        winner_id: record.winner_id(),
        players,
        bot_count: record.bot_count(),
        max_players,
        positions: runtime.map(|r| r.positions().clone()),
        board: runtime.map(|r| BoardSnapshot {
            grid: r.grid().to_rows(),
            width: r.grid().width(),
            height: r.grid().height(),
            player_colors: r.colors().clone(),
            bot_colors: r.bot_colors().to_vec(),
        }),
    }
}

fn history_entry(record: &SessionRecord, user: UserId, registry: &Registry) -> MatchHistoryEntry {
    let participants = record
        .participants()
        .iter()
        .map(|id| registry.profile(*id).display_name)
        .chain(std::iter::repeat("Bot".to_string()).take(record.bot_count()))
        .collect();

    MatchHistoryEntry {
        game_id: record.id(),
        name: record.name().to_string(),
        state: record.state(),
        created_at: record.created_at(),
        started_at: record.started_at(),
        ended_at: record.ended_at(),
        won_by_user: record.winner_id() == Some(user),
        participants,
    }
}
