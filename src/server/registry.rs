//! Session registry - sessions, broadcast groups, connections and seats

use super::connection::{ClientConnection, ConnectionId};
use crate::game::{GameError, Session, SessionId, UserId};
use crate::protocol::{GameEvent, ServerMessage};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Profile announced in the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub display_name: String,
    pub profile_image_url: Option<String>,
}

impl UserProfile {
    /// Placeholder for users whose handshake we never saw
    pub fn unknown(user: UserId) -> Self {
        Self {
            display_name: format!("Player {}", user),
            profile_image_url: None,
        }
    }
}

struct BoundConnection {
    client: ClientConnection,
    user: Option<UserId>,
}

/// In-memory index of everything the gateway routes by
///
/// Lives behind a `RwLock` owned by the gateway. The lock is only ever held
/// for short synchronous sections; session mutexes are always taken first.
#[derive(Default)]
pub struct Registry {
    sessions: HashMap<SessionId, Arc<Mutex<Session>>>,
    groups: HashMap<SessionId, HashSet<ConnectionId>>,
    connections: HashMap<ConnectionId, BoundConnection>,
    profiles: HashMap<UserId, UserProfile>,
    /// The one open session each user is seated in
    seats: HashMap<UserId, SessionId>,
    /// Finished sessions kept around until their group empties
    finished: HashSet<SessionId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // Sessions

    pub fn session(&self, id: SessionId) -> Option<Arc<Mutex<Session>>> {
        self.sessions.get(&id).cloned()
    }

    pub fn sessions(&self) -> Vec<Arc<Mutex<Session>>> {
        self.sessions.values().cloned().collect()
    }

    pub fn insert_session(&mut self, session: Session) -> Arc<Mutex<Session>> {
        let id = session.id();
        let handle = Arc::new(Mutex::new(session));
        self.sessions.insert(id, Arc::clone(&handle));
        handle
    }

    /// Drop a session together with its group and any seats pointing at it
    pub fn remove_session(&mut self, id: SessionId) {
        self.sessions.remove(&id);
        self.groups.remove(&id);
        self.finished.remove(&id);
        self.seats.retain(|_, seated| *seated != id);
    }

    /// Release every seat of a finished session and schedule it for
    /// eviction
    pub fn mark_finished(&mut self, id: SessionId) {
        self.seats.retain(|_, seated| *seated != id);
        self.finished.insert(id);
    }

    /// Evict finished sessions nobody is watching any more
    pub fn evict_idle_finished(&mut self) -> Vec<SessionId> {
        let idle: Vec<SessionId> = self
            .finished
            .iter()
            .filter(|id| self.group_is_empty(**id))
            .copied()
            .collect();
        for id in &idle {
            self.remove_session(*id);
        }
        idle
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    // Seats

    pub fn seat_of(&self, user: UserId) -> Option<SessionId> {
        self.seats.get(&user).copied()
    }

    /// Reserve `user`'s single open seat for `session`. Returns true if the
    /// seat was newly taken.
    pub fn try_seat(&mut self, user: UserId, session: SessionId) -> Result<bool, GameError> {
        match self.seats.get(&user) {
            Some(current) if *current == session => Ok(false),
            Some(_) => Err(GameError::Conflict(
                "You are already in another active game".into(),
            )),
            None => {
                self.seats.insert(user, session);
                Ok(true)
            }
        }
    }

    /// Release `user`'s seat if it points at `session`
    pub fn unseat(&mut self, user: UserId, session: SessionId) {
        if self.seats.get(&user) == Some(&session) {
            self.seats.remove(&user);
        }
    }

    // Connections and users

    pub fn add_connection(&mut self, client: ClientConnection) {
        self.connections.insert(
            client.id(),
            BoundConnection { client, user: None },
        );
    }

    /// Remove a connection from the table and every group. Returns the
    /// user it was bound to.
    pub fn remove_connection(&mut self, conn: ConnectionId) -> Option<UserId> {
        let bound = self.connections.remove(&conn)?;
        for members in self.groups.values_mut() {
            members.remove(&conn);
        }
        bound.user
    }

    /// Bind a connection to a user. A connection speaks for one user only.
    pub fn bind_user(
        &mut self,
        conn: ConnectionId,
        user: UserId,
        profile: UserProfile,
    ) -> Result<(), GameError> {
        let bound = self
            .connections
            .get_mut(&conn)
            .ok_or_else(|| GameError::NotFound("Unknown connection".into()))?;
        match bound.user {
            Some(existing) if existing != user => {
                return Err(GameError::Forbidden(
                    "Connection is already bound to another user".into(),
                ))
            }
            _ => bound.user = Some(user),
        }
        self.profiles.insert(user, profile);
        Ok(())
    }

    pub fn user_of(&self, conn: ConnectionId) -> Option<UserId> {
        self.connections.get(&conn).and_then(|c| c.user)
    }

    pub fn profile(&self, user: UserId) -> UserProfile {
        self.profiles
            .get(&user)
            .cloned()
            .unwrap_or_else(|| UserProfile::unknown(user))
    }

    pub fn connections_of(&self, user: UserId) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter(|(_, c)| c.user == Some(user))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn is_online(&self, user: UserId) -> bool {
        self.connections.values().any(|c| c.user == Some(user))
    }

    // Groups

    /// Add every connection of `user` to the group of `session`, leaving
    /// any other group first
    pub fn subscribe_user(&mut self, user: UserId, session: SessionId) {
        for conn in self.connections_of(user) {
            self.subscribe(conn, session);
        }
    }

    pub fn subscribe(&mut self, conn: ConnectionId, session: SessionId) {
        for (id, members) in self.groups.iter_mut() {
            if *id != session {
                members.remove(&conn);
            }
        }
        self.groups.entry(session).or_default().insert(conn);
    }

    pub fn unsubscribe_user(&mut self, user: UserId, session: SessionId) {
        let conns = self.connections_of(user);
        if let Some(members) = self.groups.get_mut(&session) {
            for conn in conns {
                members.remove(&conn);
            }
        }
    }

    pub fn group_is_empty(&self, session: SessionId) -> bool {
        self.groups.get(&session).map_or(true, HashSet::is_empty)
    }

    /// Senders for every member of a session's group
    pub fn group_senders(&self, session: SessionId) -> Vec<ClientConnection> {
        self.groups
            .get(&session)
            .into_iter()
            .flatten()
            .filter_map(|conn| self.connections.get(conn))
            .map(|bound| bound.client.clone())
            .collect()
    }

    pub fn sender(&self, conn: ConnectionId) -> Option<ClientConnection> {
        self.connections.get(&conn).map(|bound| bound.client.clone())
    }
}

/// Deliver an event to a set of connections without waiting on slow
/// readers
///
/// A connection whose queue is full has fallen behind and can no longer
/// follow the match in order, so it is told to hang up. The disconnect
/// policy then runs for it and a reconnect resynchronises from a snapshot.
pub fn deliver(targets: &[ClientConnection], event: GameEvent) {
    let msg = ServerMessage::Event(event);
    for client in targets {
        if let Err(e) = client.try_send(msg.clone()) {
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    tracing::warn!(
                        "Outbound queue full for client {}; closing the connection",
                        client.id()
                    );
                    client.close();
                }
                mpsc::error::TrySendError::Closed(_) => {
                    tracing::debug!("Client {} already gone", client.id())
                }
            }
        }
    }
}
