//! Integration tests for the world server.
//!
//! These tests exercise cross-component behavior: the simulation under
//! concurrent access, and real websocket sessions against a live hub.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use server::auth::MemorySessions;
use server::map::MapData;
use server::network::Hub;
use server::tick;
use server::world::World;
use shared::{
    MoveIntent, Packet, StateDelta, StateSnapshot, Welcome, PACKET_MOVE_INTENT,
    PACKET_STATE_DELTA, PACKET_STATE_SNAPSHOT, PACKET_WELCOME, TILE_WORLD,
};

const WAIT: Duration = Duration::from_secs(5);

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A running server on an ephemeral port, with direct handles to its parts.
struct TestServer {
    addr: std::net::SocketAddr,
    world: Arc<World>,
    hub: Arc<Hub>,
    sessions: Arc<MemorySessions>,
    shutdown: watch::Sender<bool>,
}

impl TestServer {
    async fn start() -> TestServer {
        let world = Arc::new(World::new(MapData::default_grid(50, 50)));
        let sessions = Arc::new(MemorySessions::new());
        let hub = Arc::new(Hub::new(world.clone(), sessions.clone()));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown, shutdown_rx) = watch::channel(false);

        tokio::spawn(hub.clone().serve(listener, shutdown_rx));

        TestServer {
            addr,
            world,
            hub,
            sessions,
            shutdown,
        }
    }

    /// Also runs the tick driver, wired exactly as in `main`.
    fn start_ticking(&self, period: Duration) {
        let world = self.world.clone();
        let hub = self.hub.clone();
        let shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(tick::Loop::new(period).run(shutdown_rx, move |tick, delta| {
            world.step(delta);
            if world.drain_dirty() {
                hub.broadcast_state(tick);
            }
        }));
    }

    async fn connect(&self, token: &str) -> WsClient {
        let url = format!("ws://{}/ws?token={}", self.addr, token);
        let (ws, _) = timeout(WAIT, connect_async(url)).await.unwrap().unwrap();
        ws
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Reads the next text frame as a decoded packet envelope.
async fn next_packet(ws: &mut WsClient) -> Packet {
    loop {
        let message = timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for a packet")
            .expect("connection closed while waiting for a packet")
            .unwrap();

        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn send_packet(ws: &mut WsClient, packet: &Packet) {
    let text = serde_json::to_string(packet).unwrap();
    timeout(WAIT, ws.send(Message::Text(text)))
        .await
        .unwrap()
        .unwrap();
}

/// SESSION LIFECYCLE TESTS
mod session_tests {
    use super::*;

    #[tokio::test]
    async fn upgrade_rejects_unknown_token() {
        let server = TestServer::start().await;

        let url = format!("ws://{}/ws?token=not-a-session", server.addr);
        match connect_async(url).await {
            Err(WsError::Http(response)) => assert_eq!(response.status(), 401),
            other => panic!("expected an HTTP 401 rejection, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn upgrade_rejects_missing_token() {
        let server = TestServer::start().await;

        let url = format!("ws://{}/ws", server.addr);
        match connect_async(url).await {
            Err(WsError::Http(response)) => assert_eq!(response.status(), 401),
            other => panic!("expected an HTTP 401 rejection, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn welcome_then_snapshot_on_connect() {
        let server = TestServer::start().await;
        let token = server.sessions.create("u1");
        let mut ws = server.connect(&token).await;

        let packet = next_packet(&mut ws).await;
        assert_eq!(packet.packet_type, PACKET_WELCOME);
        let welcome: Welcome = packet.decode_payload().unwrap();
        assert_eq!(welcome.id, "u1");

        let packet = next_packet(&mut ws).await;
        assert_eq!(packet.packet_type, PACKET_STATE_SNAPSHOT);
        let snapshot: StateSnapshot = packet.decode_payload().unwrap();
        assert_eq!(snapshot.players.len(), 1);
        assert_eq!(snapshot.players[0].id, "u1");
        // Spawn is the center tile of the 50x50 grid.
        assert_eq!(snapshot.players[0].x, 25 * TILE_WORLD + TILE_WORLD / 2);
        assert_eq!(snapshot.players[0].y, 81600);
    }

    #[tokio::test]
    async fn second_connection_displaces_the_first() {
        let server = TestServer::start().await;
        let token = server.sessions.create("u1");

        let mut first = server.connect(&token).await;
        let packet = next_packet(&mut first).await;
        assert_eq!(packet.packet_type, PACKET_WELCOME);

        let mut second = server.connect(&token).await;
        let packet = next_packet(&mut second).await;
        assert_eq!(packet.packet_type, PACKET_WELCOME);
        let welcome: Welcome = packet.decode_payload().unwrap();
        assert_eq!(welcome.id, "u1");

        // The first socket is closed by the server.
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            assert!(tokio::time::Instant::now() < deadline, "first socket never closed");
            match timeout(WAIT, first.next()).await.unwrap() {
                None | Some(Ok(Message::Close(_))) | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }

        // Exactly one registered session and one world entity remain.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(server.hub.session_count(), 1);
        let players = server.world.snapshot_players();
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].id, "u1");
    }

    #[tokio::test]
    async fn disconnect_removes_the_world_entity() {
        let server = TestServer::start().await;
        let token = server.sessions.create("u1");

        let mut ws = server.connect(&token).await;
        next_packet(&mut ws).await;
        assert_eq!(server.world.snapshot_players().len(), 1);

        timeout(WAIT, ws.close(None)).await.unwrap().unwrap();
        drop(ws);

        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            if server.world.snapshot_players().is_empty() {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "entity never removed");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(server.hub.session_count(), 0);
    }

    #[tokio::test]
    async fn unknown_and_invalid_packets_leave_the_session_open() {
        let server = TestServer::start().await;
        let token = server.sessions.create("u1");
        let mut ws = server.connect(&token).await;
        next_packet(&mut ws).await;
        next_packet(&mut ws).await;

        // Unknown type: ignored.
        let ping: Packet = serde_json::from_str(r#"{"type":"PING","payload":{}}"#).unwrap();
        send_packet(&mut ws, &ping).await;

        // Known type with a malformed payload: logged and ignored.
        let bad: Packet =
            serde_json::from_str(r#"{"type":"MOVE_INTENT","payload":{"x":"east"}}"#).unwrap();
        send_packet(&mut ws, &bad).await;

        // A move onto a blocked border tile: silently dropped.
        let blocked = Packet::new(PACKET_MOVE_INTENT, &MoveIntent { x: 0, y: 0 }).unwrap();
        send_packet(&mut ws, &blocked).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(server.hub.session_count(), 1);

        let players = server.world.snapshot_players();
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].x, 25 * TILE_WORLD + TILE_WORLD / 2);
    }
}

/// END-TO-END SIMULATION TESTS
mod simulation_tests {
    use super::*;

    #[tokio::test]
    async fn move_intent_walks_the_player_across_ticks() {
        let server = TestServer::start().await;
        server.start_ticking(Duration::from_millis(10));

        let token = server.sessions.create("u1");
        let mut ws = server.connect(&token).await;

        let welcome = next_packet(&mut ws).await;
        assert_eq!(welcome.packet_type, PACKET_WELCOME);

        // A delta from the spawn tick may arrive before the initial
        // snapshot; read until the snapshot shows up.
        let snapshot: StateSnapshot = loop {
            let packet = next_packet(&mut ws).await;
            if packet.packet_type == PACKET_STATE_SNAPSHOT {
                break packet.decode_payload().unwrap();
            }
        };
        let me = &snapshot.players[0];
        let goal = (me.x + TILE_WORLD, me.y);

        let intent = Packet::new(PACKET_MOVE_INTENT, &MoveIntent { x: goal.0, y: goal.1 }).unwrap();
        send_packet(&mut ws, &intent).await;

        // Deltas stream in while the player walks; the last one lands on the
        // target tile center.
        let deadline = tokio::time::Instant::now() + WAIT;
        let mut last_seen = (me.x, me.y);
        loop {
            assert!(
                tokio::time::Instant::now() < deadline,
                "player never arrived, last seen at {:?}",
                last_seen
            );

            let packet = next_packet(&mut ws).await;
            if packet.packet_type != PACKET_STATE_DELTA {
                continue;
            }
            let delta: StateDelta = packet.decode_payload().unwrap();
            if let Some(mine) = delta.players.iter().find(|player| player.id == "u1") {
                assert!(mine.x >= last_seen.0, "x must be monotonic on an eastward walk");
                last_seen = (mine.x, mine.y);
                if (mine.x, mine.y) == goal {
                    break;
                }
            }
        }

        // Arrived and idle: no further deltas for a quiet world.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let players = server.world.snapshot_players();
        assert_eq!((players[0].x, players[0].y), goal);
    }
}

/// CONCURRENT WORLD ACCESS TESTS
mod world_tests {
    use super::*;
    use std::thread;

    #[test]
    fn concurrent_operations_keep_state_consistent() {
        let world = Arc::new(World::new(MapData::default_grid(50, 50)));
        for i in 0..8 {
            world.add_player(&format!("u{i}"));
        }

        let mut handles = Vec::new();

        for i in 0..8 {
            let world = world.clone();
            handles.push(thread::spawn(move || {
                let id = format!("u{i}");
                for round in 0..50i64 {
                    let tile = 1 + (i * 5 + round) % 48;
                    world.set_target(&id, tile * TILE_WORLD + 100, tile * TILE_WORLD + 100);
                    world.step(0.05);
                    let _ = world.snapshot_interest(&id, 1, 8);
                }
            }));
        }

        {
            let world = world.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    world.step(0.05);
                    world.drain_dirty();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        // Every surviving position is inside the map, in world units.
        let bound = 50 * TILE_WORLD;
        for player in world.snapshot_players() {
            assert!(player.x >= 0 && player.x < bound, "{} x out of bounds", player.id);
            assert!(player.y >= 0 && player.y < bound, "{} y out of bounds", player.id);
        }
    }

    #[test]
    fn churn_of_adds_and_removes_converges() {
        let world = Arc::new(World::new(MapData::default_grid(50, 50)));

        let mut handles = Vec::new();
        for i in 0..4 {
            let world = world.clone();
            handles.push(thread::spawn(move || {
                let id = format!("churn{i}");
                for _ in 0..100 {
                    world.add_player(&id);
                    world.remove_player(&id);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(world.snapshot_players().is_empty());
        // The last removal left the flag set; draining clears it.
        assert!(world.drain_dirty());
        assert!(!world.drain_dirty());
    }
}
