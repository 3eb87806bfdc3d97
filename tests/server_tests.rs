//! End-to-end tests: a real listener on a loopback port and TCP clients

use async_trait::async_trait;
use gridrunners::client::{App, GameClient};
use gridrunners::config::{GameConfig, ServerConfig};
use gridrunners::game::{
    LifecycleState, Session, SessionId, SessionRecord, SessionRules, UserId,
};
use gridrunners::maze::{CellType, LocalMazeSource, MazeProvider, Position};
use gridrunners::protocol::{
    deserialize, serialize, ClientMessage, GameEvent, GameSummary, ServerMessage,
    MAX_MESSAGE_SIZE, PROTOCOL_VERSION,
};
use gridrunners::server::{
    read_message, write_message, ClientConnection, Gateway, ServerListener,
};
use gridrunners::store::{MemoryStore, SessionStore, StoreError};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(5);

const ALICE: UserId = UserId(1);
const BOB: UserId = UserId(2);
const CAROL: UserId = UserId(3);

struct TestServer {
    addr: String,
    gateway: Arc<Gateway>,
    _shutdown: mpsc::Sender<()>,
}

impl TestServer {
    async fn start(store: Arc<dyn SessionStore>) -> Self {
        let gateway = Arc::new(Gateway::new(
            store,
            MazeProvider::local(),
            GameConfig::default(),
        ));
        let config = ServerConfig {
            bind: "127.0.0.1:0".to_string(),
            ..Default::default()
        };
        let listener = ServerListener::bind(&config, Arc::clone(&gateway))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        tokio::spawn(listener.run(shutdown_rx));

        Self {
            addr,
            gateway,
            _shutdown: shutdown_tx,
        }
    }

    async fn client(&self, user: UserId, name: &str) -> GameClient {
        GameClient::connect(&self.addr, user, name).await.unwrap()
    }

    /// Poll until the gateway holds `count` sessions
    async fn wait_for_sessions(&self, count: usize) {
        for _ in 0..100 {
            if self.gateway.session_count().await == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!(
            "expected {} sessions, found {}",
            count,
            self.gateway.session_count().await
        );
    }
}

/// Store that can be switched into failing every write
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    failing: AtomicBool,
}

impl FlakyStore {
    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("disk on fire".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SessionStore for FlakyStore {
    async fn save(&self, record: &SessionRecord) -> Result<(), StoreError> {
        self.check()?;
        self.inner.save(record).await
    }

    async fn delete(&self, id: SessionId) -> Result<(), StoreError> {
        self.check()?;
        self.inner.delete(id).await
    }

    async fn load(&self, id: SessionId) -> Result<Option<SessionRecord>, StoreError> {
        self.inner.load(id).await
    }

    async fn list(&self) -> Result<Vec<SessionRecord>, StoreError> {
        self.inner.list().await
    }
}

fn expect_game(msg: ServerMessage) -> GameSummary {
    match msg {
        ServerMessage::Game { game } => game,
        other => panic!("expected Game, got {:?}", other),
    }
}

fn expect_error(msg: ServerMessage, expected_kind: &str) -> String {
    match msg {
        ServerMessage::GameError { kind, message } => {
            assert_eq!(kind, expected_kind, "unexpected error: {}", message);
            message
        }
        other => panic!("expected {} error, got {:?}", expected_kind, other),
    }
}

async fn create_game(client: &mut GameClient, name: &str) -> SessionId {
    let reply = client
        .request(&ClientMessage::CreateGame {
            name: name.to_string(),
        })
        .await
        .unwrap();
    expect_game(reply).id
}

async fn wait_event<F>(client: &mut GameClient, mut pred: F) -> GameEvent
where
    F: FnMut(&GameEvent) -> bool,
{
    let msg = client
        .wait_for(WAIT, |m| matches!(m, ServerMessage::Event(e) if pred(e)))
        .await
        .unwrap();
    match msg {
        ServerMessage::Event(event) => event,
        _ => unreachable!(),
    }
}

/// Alice creates a game, Bob joins, Alice starts it. Returns the game and
/// the `GameStarted` event.
async fn started_game(alice: &mut GameClient, bob: &mut GameClient) -> (SessionId, GameEvent) {
    let game_id = create_game(alice, "Alpha").await;
    expect_game(
        bob.request(&ClientMessage::JoinGame { game_id })
            .await
            .unwrap(),
    );

    let reply = alice
        .request(&ClientMessage::StartGame { game_id })
        .await
        .unwrap();
    assert!(matches!(reply, ServerMessage::Ack { ref for_command } if for_command == "StartGame"));

    let started = wait_event(alice, |e| matches!(e, GameEvent::GameStarted { .. })).await;
    wait_event(bob, |e| matches!(e, GameEvent::GameStarted { .. })).await;
    (game_id, started)
}

/// Shortest walk from `from` to the finish avoiding `blocked`
fn path_to_finish(rows: &[Vec<u8>], from: Position, blocked: &[Position]) -> Vec<Position> {
    let cell = |p: Position| -> Option<CellType> {
        let row = rows.get(usize::try_from(p.y).ok()?)?;
        CellType::from_code(i64::from(*row.get(usize::try_from(p.x).ok()?)?))
    };

    let mut previous: HashMap<Position, Position> = HashMap::new();
    let mut queue = VecDeque::from([from]);
    while let Some(current) = queue.pop_front() {
        if cell(current) == Some(CellType::Finish) {
            let mut path = vec![current];
            let mut step = current;
            while let Some(prev) = previous.get(&step) {
                if *prev == from {
                    break;
                }
                path.push(*prev);
                step = *prev;
            }
            path.reverse();
            return path;
        }
        for next in current.neighbors() {
            let walkable = cell(next).is_some_and(|c| c.is_walkable());
            if walkable && next != from && !blocked.contains(&next) && !previous.contains_key(&next)
            {
                previous.insert(next, current);
                queue.push_back(next);
            }
        }
    }
    panic!("no path from {} to the finish", from);
}

#[tokio::test]
async fn test_server_sends_welcome() {
    let server = TestServer::start(Arc::new(MemoryStore::new())).await;
    let stream = TcpStream::connect(&server.addr).await.unwrap();
    let (mut reader, _writer) = stream.into_split();

    let bytes = tokio::time::timeout(WAIT, read_message(&mut reader, MAX_MESSAGE_SIZE))
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match deserialize::<ServerMessage>(&bytes).unwrap() {
        ServerMessage::Welcome {
            protocol_version, ..
        } => assert_eq!(protocol_version, PROTOCOL_VERSION),
        other => panic!("expected Welcome, got {:?}", other),
    }
}

#[tokio::test]
async fn test_commands_require_hello() {
    let server = TestServer::start(Arc::new(MemoryStore::new())).await;
    let stream = TcpStream::connect(&server.addr).await.unwrap();
    let (mut reader, mut writer) = stream.into_split();

    // Welcome
    read_message(&mut reader, MAX_MESSAGE_SIZE).await.unwrap();

    let request = serialize(&ClientMessage::ListGames).unwrap();
    write_message(&mut writer, &request).await.unwrap();
    let bytes = tokio::time::timeout(WAIT, read_message(&mut reader, MAX_MESSAGE_SIZE))
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    expect_error(deserialize(&bytes).unwrap(), "Forbidden");
}

#[tokio::test]
async fn test_hello_rejects_other_protocol_versions() {
    let server = TestServer::start(Arc::new(MemoryStore::new())).await;
    let stream = TcpStream::connect(&server.addr).await.unwrap();
    let (mut reader, mut writer) = stream.into_split();
    read_message(&mut reader, MAX_MESSAGE_SIZE).await.unwrap();

    let hello = serialize(&ClientMessage::Hello {
        protocol_version: PROTOCOL_VERSION + 1,
        user_id: ALICE,
        display_name: "Alice".to_string(),
        profile_image_url: None,
    })
    .unwrap();
    write_message(&mut writer, &hello).await.unwrap();
    let bytes = read_message(&mut reader, MAX_MESSAGE_SIZE)
        .await
        .unwrap()
        .unwrap();
    expect_error(deserialize(&bytes).unwrap(), "ValidationFailed");
}

#[tokio::test]
async fn test_garbage_frame_gets_validation_error() {
    let server = TestServer::start(Arc::new(MemoryStore::new())).await;
    let stream = TcpStream::connect(&server.addr).await.unwrap();
    let (mut reader, mut writer) = stream.into_split();
    read_message(&mut reader, MAX_MESSAGE_SIZE).await.unwrap();

    write_message(&mut writer, b"\xc1\xc1\xc1").await.unwrap();
    let bytes = read_message(&mut reader, MAX_MESSAGE_SIZE)
        .await
        .unwrap()
        .unwrap();
    expect_error(deserialize(&bytes).unwrap(), "ValidationFailed");
}

#[tokio::test]
async fn test_create_join_and_list() {
    let server = TestServer::start(Arc::new(MemoryStore::new())).await;
    let mut alice = server.client(ALICE, "Alice").await;
    let mut bob = server.client(BOB, "Bob").await;

    let game = expect_game(
        alice
            .request(&ClientMessage::CreateGame {
                name: "  Alpha  ".to_string(),
            })
            .await
            .unwrap(),
    );
    assert_eq!(game.name, "Alpha");
    assert_eq!(game.state, LifecycleState::Lobby);
    assert_eq!(game.players.len(), 1);
    assert_eq!(game.players[0].display_name, "Alice");

    // Creators do not see their own lobby in the list
    match alice.request(&ClientMessage::ListGames).await.unwrap() {
        ServerMessage::GameList { games } => assert!(games.is_empty()),
        other => panic!("expected GameList, got {:?}", other),
    }
    match bob.request(&ClientMessage::ListGames).await.unwrap() {
        ServerMessage::GameList { games } => {
            assert_eq!(games.len(), 1);
            assert_eq!(games[0].id, game.id);
        }
        other => panic!("expected GameList, got {:?}", other),
    }

    let joined = expect_game(
        bob.request(&ClientMessage::JoinGame { game_id: game.id })
            .await
            .unwrap(),
    );
    assert_eq!(joined.total_participants(), 2);

    let event = wait_event(&mut alice, |e| matches!(e, GameEvent::PlayerJoined { .. })).await;
    match event {
        GameEvent::PlayerJoined {
            player_id,
            display_name,
            ..
        } => {
            assert_eq!(player_id, BOB);
            assert_eq!(display_name, "Bob");
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_bad_name_is_rejected() {
    let server = TestServer::start(Arc::new(MemoryStore::new())).await;
    let mut alice = server.client(ALICE, "Alice").await;

    let reply = alice
        .request(&ClientMessage::CreateGame {
            name: "ab".to_string(),
        })
        .await
        .unwrap();
    expect_error(reply, "ValidationFailed");
    assert_eq!(server.gateway.session_count().await, 0);
}

#[tokio::test]
async fn test_one_open_game_per_user() {
    let server = TestServer::start(Arc::new(MemoryStore::new())).await;
    let mut alice = server.client(ALICE, "Alice").await;
    let mut bob = server.client(BOB, "Bob").await;

    let first = create_game(&mut alice, "Alpha").await;
    let reply = alice
        .request(&ClientMessage::CreateGame {
            name: "Beta".to_string(),
        })
        .await
        .unwrap();
    expect_error(reply, "Conflict");

    let other = create_game(&mut bob, "Gamma").await;
    let reply = alice
        .request(&ClientMessage::JoinGame { game_id: other })
        .await
        .unwrap();
    expect_error(reply, "Conflict");

    // Rejoining your own lobby is a duplicate, not a seat conflict
    let reply = alice
        .request(&ClientMessage::JoinGame { game_id: first })
        .await
        .unwrap();
    expect_error(reply, "Conflict");
    assert_eq!(server.gateway.session_count().await, 2);
}

#[tokio::test]
async fn test_errors_reach_only_the_requester() {
    let server = TestServer::start(Arc::new(MemoryStore::new())).await;
    let mut alice = server.client(ALICE, "Alice").await;
    let mut carol = server.client(CAROL, "Carol").await;

    let game_id = create_game(&mut alice, "Alpha").await;

    let reply = carol
        .request(&ClientMessage::AddBot { game_id })
        .await
        .unwrap();
    expect_error(reply, "Forbidden");

    let reply = carol
        .request(&ClientMessage::StartGame { game_id })
        .await
        .unwrap();
    expect_error(reply, "Forbidden");

    assert!(alice
        .recv_timeout(Duration::from_millis(200))
        .await
        .is_err());
}

#[tokio::test]
async fn test_start_needs_two_players() {
    let server = TestServer::start(Arc::new(MemoryStore::new())).await;
    let mut alice = server.client(ALICE, "Alice").await;
    let game_id = create_game(&mut alice, "Alpha").await;

    // Bots do not count towards the minimum
    let reply = alice
        .request(&ClientMessage::AddBot { game_id })
        .await
        .unwrap();
    assert!(matches!(reply, ServerMessage::Ack { .. }));
    let event = wait_event(&mut alice, |e| matches!(e, GameEvent::BotAdded { .. })).await;
    assert!(matches!(
        event,
        GameEvent::BotAdded {
            bot_count: 1,
            total_participants: 2,
            ..
        }
    ));

    let reply = alice
        .request(&ClientMessage::StartGame { game_id })
        .await
        .unwrap();
    expect_error(reply, "InvalidState");
}

#[tokio::test]
async fn test_full_match_to_game_over() {
    let server = TestServer::start(Arc::new(MemoryStore::new())).await;
    let mut alice = server.client(ALICE, "Alice").await;
    let mut bob = server.client(BOB, "Bob").await;

    let (game_id, started) = started_game(&mut alice, &mut bob).await;
    let GameEvent::GameStarted {
        grid,
        player_positions,
        player_colors,
        width,
        height,
        ..
    } = started
    else {
        unreachable!()
    };
    assert_eq!((width, height), (20, 20));
    assert_eq!(player_positions.len(), 2);
    assert_eq!(player_colors.len(), 2);

    // Joining a running match is refused
    let mut carol = server.client(CAROL, "Carol").await;
    let reply = carol
        .request(&ClientMessage::JoinGame { game_id })
        .await
        .unwrap();
    expect_error(reply, "InvalidState");

    let start = player_positions[&ALICE];
    let path = path_to_finish(&grid, start, &[player_positions[&BOB]]);

    let mut current = start;
    for step in &path {
        alice
            .send(&ClientMessage::MovePlayer {
                game_id,
                x: step.x,
                y: step.y,
                current_x: current.x,
                current_y: current.y,
            })
            .await
            .unwrap();
        current = *step;
    }

    // Bob sees every step, then the result
    let mut seen = Vec::new();
    loop {
        let event = wait_event(&mut bob, |_| true).await;
        match event {
            GameEvent::PlayerMoved {
                player_id,
                position,
                ..
            } => {
                assert_eq!(player_id, ALICE);
                seen.push(position);
            }
            GameEvent::GameOver {
                winner_id,
                final_positions,
                ..
            } => {
                assert_eq!(winner_id, ALICE);
                assert_eq!(final_positions[&ALICE], current);
                break;
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert_eq!(seen, path);

    let over = wait_event(&mut alice, |e| matches!(e, GameEvent::GameOver { .. })).await;
    assert!(matches!(over, GameEvent::GameOver { winner_id, .. } if winner_id == ALICE));

    let game = expect_game(
        bob.request(&ClientMessage::GetGame { game_id })
            .await
            .unwrap(),
    );
    assert_eq!(game.state, LifecycleState::Finished);
    assert_eq!(game.winner_id, Some(ALICE));
    assert!(game.ended_at.is_some());

    // Seats are free again once the match is over
    create_game(&mut alice, "Rematch").await;

    let reply = bob
        .request(&ClientMessage::CompleteGame { game_id })
        .await
        .unwrap();
    assert!(matches!(reply, ServerMessage::Ack { .. }));
}

#[tokio::test]
async fn test_illegal_moves_are_silent() {
    let server = TestServer::start(Arc::new(MemoryStore::new())).await;
    let mut alice = server.client(ALICE, "Alice").await;
    let mut bob = server.client(BOB, "Bob").await;

    let (game_id, started) = started_game(&mut alice, &mut bob).await;
    let GameEvent::GameStarted {
        player_positions, ..
    } = started
    else {
        unreachable!()
    };
    let start = player_positions[&ALICE];

    // Two steps away, and into the border wall
    for (x, y) in [(start.x + 2, start.y), (start.x, start.y - 1)] {
        alice
            .send(&ClientMessage::MovePlayer {
                game_id,
                x,
                y,
                current_x: start.x,
                current_y: start.y,
            })
            .await
            .unwrap();
    }
    assert!(bob.recv_timeout(Duration::from_millis(200)).await.is_err());

    // Completing a running match is not allowed
    let reply = alice
        .request(&ClientMessage::CompleteGame { game_id })
        .await
        .unwrap();
    expect_error(reply, "InvalidState");
}

#[tokio::test]
async fn test_lobby_disconnect_leaves_and_last_one_deletes() {
    let store = Arc::new(MemoryStore::new());
    let server = TestServer::start(store.clone()).await;
    let mut alice = server.client(ALICE, "Alice").await;
    let mut bob = server.client(BOB, "Bob").await;

    let game_id = create_game(&mut alice, "Alpha").await;
    expect_game(
        bob.request(&ClientMessage::JoinGame { game_id })
            .await
            .unwrap(),
    );
    wait_event(&mut alice, |e| matches!(e, GameEvent::PlayerJoined { .. })).await;

    drop(bob);
    let event = wait_event(&mut alice, |e| matches!(e, GameEvent::PlayerLeft { .. })).await;
    match event {
        GameEvent::PlayerLeft {
            player_id,
            remaining_players,
            ..
        } => {
            assert_eq!(player_id, BOB);
            assert_eq!(remaining_players.len(), 1);
            assert_eq!(remaining_players[0].id, ALICE);
        }
        _ => unreachable!(),
    }

    drop(alice);
    server.wait_for_sessions(0).await;
    assert!(store.load(game_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_leave_lobby_frees_the_seat() {
    let server = TestServer::start(Arc::new(MemoryStore::new())).await;
    let mut alice = server.client(ALICE, "Alice").await;
    let mut bob = server.client(BOB, "Bob").await;

    let game_id = create_game(&mut alice, "Alpha").await;
    expect_game(
        bob.request(&ClientMessage::JoinGame { game_id })
            .await
            .unwrap(),
    );

    let reply = bob
        .request(&ClientMessage::LeaveLobby { game_id })
        .await
        .unwrap();
    assert!(matches!(reply, ServerMessage::Ack { .. }));
    wait_event(&mut alice, |e| matches!(e, GameEvent::PlayerLeft { .. })).await;

    // Leaving twice is an error
    let reply = bob
        .request(&ClientMessage::LeaveLobby { game_id })
        .await
        .unwrap();
    expect_error(reply, "NotFound");

    create_game(&mut bob, "Beta").await;
}

#[tokio::test]
async fn test_active_disconnect_and_reconnect() {
    let server = TestServer::start(Arc::new(MemoryStore::new())).await;
    let mut alice = server.client(ALICE, "Alice").await;
    let mut bob = server.client(BOB, "Bob").await;

    let (game_id, _) = started_game(&mut alice, &mut bob).await;

    drop(bob);
    let event = wait_event(&mut alice, |e| {
        matches!(e, GameEvent::PlayerDisconnected { .. })
    })
    .await;
    match event {
        GameEvent::PlayerDisconnected {
            player_id,
            connected_players,
            ..
        } => {
            assert_eq!(player_id, BOB);
            assert_eq!(connected_players[&ALICE], true);
            assert_eq!(connected_players[&BOB], false);
        }
        _ => unreachable!(),
    }

    let mut bob = server.client(BOB, "Bob").await;
    let event = wait_event(&mut alice, |e| {
        matches!(e, GameEvent::PlayerReconnected { .. })
    })
    .await;
    match event {
        GameEvent::PlayerReconnected {
            player_id,
            connected_players,
            ..
        } => {
            assert_eq!(player_id, BOB);
            assert!(connected_players.values().all(|c| *c));
        }
        _ => unreachable!(),
    }

    // Everything needed to keep playing arrives with the reconnect
    let snapshot = expect_game(
        bob.wait_for(WAIT, |m| matches!(m, ServerMessage::Game { .. }))
            .await
            .unwrap(),
    );
    let mut app = App::new(BOB);
    app.apply(&ServerMessage::Game {
        game: snapshot.clone(),
    });
    assert_eq!(app.game, Some(game_id));
    assert!(app.board.is_some());

    let board = snapshot.board.expect("running match carries its board");
    let positions = snapshot.positions.expect("running match carries positions");
    assert_eq!((board.width, board.height), (20, 20));
    assert_eq!(board.player_colors.len(), 2);

    let start = app.my_position().unwrap();
    assert_eq!(start, positions[&BOB]);
    let step = path_to_finish(&board.grid, start, &[positions[&ALICE]])[0];
    bob.send(&ClientMessage::MovePlayer {
        game_id,
        x: step.x,
        y: step.y,
        current_x: start.x,
        current_y: start.y,
    })
    .await
    .unwrap();

    // Both sides see the move, so Bob is back in the broadcast group
    for client in [&mut alice, &mut bob] {
        let moved = wait_event(client, |e| matches!(e, GameEvent::PlayerMoved { .. })).await;
        assert!(matches!(
            moved,
            GameEvent::PlayerMoved { player_id, position, .. } if player_id == BOB && position == step
        ));
    }

    let game = expect_game(
        bob.request(&ClientMessage::GetGame { game_id })
            .await
            .unwrap(),
    );
    assert_eq!(game.state, LifecycleState::Active);
    assert!(game.players.iter().all(|p| p.connected == Some(true)));
}

#[tokio::test]
async fn test_everyone_leaving_deletes_active_game() {
    let store = Arc::new(MemoryStore::new());
    let server = TestServer::start(store.clone()).await;
    let mut alice = server.client(ALICE, "Alice").await;
    let mut bob = server.client(BOB, "Bob").await;

    let (game_id, _) = started_game(&mut alice, &mut bob).await;
    drop(bob);
    wait_event(&mut alice, |e| {
        matches!(e, GameEvent::PlayerDisconnected { .. })
    })
    .await;
    drop(alice);

    server.wait_for_sessions(0).await;
    assert!(store.load(game_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_store_failure_rolls_back() {
    let store = Arc::new(FlakyStore::default());
    let server = TestServer::start(store.clone()).await;
    let mut alice = server.client(ALICE, "Alice").await;
    let mut bob = server.client(BOB, "Bob").await;

    let game_id = create_game(&mut alice, "Alpha").await;

    store.set_failing(true);
    let reply = bob
        .request(&ClientMessage::JoinGame { game_id })
        .await
        .unwrap();
    expect_error(reply, "UpstreamUnavailable");

    let reply = alice
        .request(&ClientMessage::CreateGame {
            name: "Beta".to_string(),
        })
        .await
        .unwrap();
    expect_error(reply, "Conflict");

    // Nothing was broadcast and nothing changed
    assert!(alice
        .recv_timeout(Duration::from_millis(200))
        .await
        .is_err());
    let game = expect_game(
        alice
            .request(&ClientMessage::GetGame { game_id })
            .await
            .unwrap(),
    );
    assert_eq!(game.players.len(), 1);

    store.set_failing(false);
    let joined = expect_game(
        bob.request(&ClientMessage::JoinGame { game_id })
            .await
            .unwrap(),
    );
    assert_eq!(joined.players.len(), 2);
    let stored = store.load(game_id).await.unwrap().unwrap();
    assert!(stored.is_participant(BOB));
}

#[tokio::test]
async fn test_restore_keeps_lobbies_and_drops_matches() {
    let store = Arc::new(MemoryStore::new());

    let mut lobby = Session::create("Lobby", SessionRules::default()).unwrap();
    lobby.join(ALICE).unwrap();
    store.save(lobby.record()).await.unwrap();

    let mut running = Session::create("Running", SessionRules::default()).unwrap();
    running.join(BOB).unwrap();
    running.join(CAROL).unwrap();
    running.claim_start(BOB).unwrap();
    running
        .activate(LocalMazeSource.layout(20, 20, 2))
        .unwrap();
    store.save(running.record()).await.unwrap();

    let gateway = Gateway::new(store.clone(), MazeProvider::local(), GameConfig::default());
    assert_eq!(gateway.restore().await.unwrap(), 1);
    assert_eq!(gateway.session_count().await, 1);
    assert!(store.load(lobby.id()).await.unwrap().is_some());
    assert!(store.load(running.id()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_restored_lobby_keeps_its_seat() {
    let store = Arc::new(MemoryStore::new());
    let mut lobby = Session::create("Lobby", SessionRules::default()).unwrap();
    lobby.join(ALICE).unwrap();
    store.save(lobby.record()).await.unwrap();

    let server = TestServer::start(store.clone()).await;
    server.gateway.restore().await.unwrap();

    let mut alice = server.client(ALICE, "Alice").await;
    let reply = alice
        .request(&ClientMessage::CreateGame {
            name: "Second".to_string(),
        })
        .await
        .unwrap();
    expect_error(reply, "Conflict");

    let game = expect_game(
        alice
            .request(&ClientMessage::GetGame {
                game_id: lobby.id(),
            })
            .await
            .unwrap(),
    );
    assert_eq!(game.name, "Lobby");
    assert!(game.is_participant(ALICE));
}

#[tokio::test]
async fn test_slow_consumer_is_disconnected() {
    let gateway = Gateway::new(
        Arc::new(MemoryStore::new()),
        MazeProvider::local(),
        GameConfig::default(),
    );

    // Alice never reads her queue
    let (alice_tx, _alice_rx) = mpsc::channel(1);
    let alice = ClientConnection::new(alice_tx);
    let (bob_tx, mut bob_rx) = mpsc::channel(16);
    let bob = ClientConnection::new(bob_tx);
    gateway.connect(alice.clone()).await;
    gateway.connect(bob.clone()).await;

    for (conn, user, name) in [(&alice, ALICE, "Alice"), (&bob, BOB, "Bob")] {
        let reply = gateway
            .handle(
                conn.id(),
                ClientMessage::Hello {
                    protocol_version: PROTOCOL_VERSION,
                    user_id: user,
                    display_name: name.to_string(),
                    profile_image_url: None,
                },
            )
            .await;
        assert!(matches!(reply, Some(ServerMessage::Ack { .. })));
    }

    let reply = gateway
        .handle(
            alice.id(),
            ClientMessage::CreateGame {
                name: "Alpha".to_string(),
            },
        )
        .await;
    let game_id = expect_game(reply.unwrap()).id;

    let reply = gateway
        .handle(bob.id(), ClientMessage::JoinGame { game_id })
        .await;
    expect_game(reply.unwrap());
    let reply = gateway
        .handle(bob.id(), ClientMessage::AddBot { game_id })
        .await;
    assert!(matches!(reply, Some(ServerMessage::Ack { .. })));

    // Lobby broadcasts overflow her single slot
    tokio::time::timeout(WAIT, alice.closed())
        .await
        .expect("overflowing connection should be closed");

    gateway.disconnect(alice.id()).await;
    let left = tokio::time::timeout(WAIT, async {
        while let Some(msg) = bob_rx.recv().await {
            if let ServerMessage::Event(event @ GameEvent::PlayerLeft { .. }) = msg {
                return event;
            }
        }
        panic!("Bob's queue closed");
    })
    .await
    .unwrap();
    assert!(matches!(left, GameEvent::PlayerLeft { player_id, .. } if player_id == ALICE));
}

#[tokio::test]
async fn test_match_history_lists_finished_games() {
    let server = TestServer::start(Arc::new(MemoryStore::new())).await;
    let mut alice = server.client(ALICE, "Alice").await;
    let mut bob = server.client(BOB, "Bob").await;
    let mut carol = server.client(CAROL, "Carol").await;

    let (game_id, started) = started_game(&mut alice, &mut bob).await;
    let GameEvent::GameStarted {
        grid,
        player_positions,
        ..
    } = started
    else {
        unreachable!()
    };

    // Running matches are not history yet
    match alice.request(&ClientMessage::MatchHistory).await.unwrap() {
        ServerMessage::MatchHistory { matches } => assert!(matches.is_empty()),
        other => panic!("expected MatchHistory, got {:?}", other),
    }

    let mut current = player_positions[&ALICE];
    for step in path_to_finish(&grid, current, &[player_positions[&BOB]]) {
        alice
            .send(&ClientMessage::MovePlayer {
                game_id,
                x: step.x,
                y: step.y,
                current_x: current.x,
                current_y: current.y,
            })
            .await
            .unwrap();
        current = step;
    }
    wait_event(&mut alice, |e| matches!(e, GameEvent::GameOver { .. })).await;
    wait_event(&mut bob, |e| matches!(e, GameEvent::GameOver { .. })).await;

    let history = |msg: ServerMessage| match msg {
        ServerMessage::MatchHistory { matches } => matches,
        other => panic!("expected MatchHistory, got {:?}", other),
    };

    let mine = history(alice.request(&ClientMessage::MatchHistory).await.unwrap());
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].game_id, game_id);
    assert_eq!(mine[0].name, "Alpha");
    assert_eq!(mine[0].state, LifecycleState::Finished);
    assert!(mine[0].won_by_user);
    assert!(mine[0].ended_at.is_some());
    assert_eq!(mine[0].participants, vec!["Alice", "Bob"]);

    let theirs = history(bob.request(&ClientMessage::MatchHistory).await.unwrap());
    assert_eq!(theirs.len(), 1);
    assert!(!theirs[0].won_by_user);

    let none = history(carol.request(&ClientMessage::MatchHistory).await.unwrap());
    assert!(none.is_empty());
}
