//! WebSocket session hub: authenticated upgrades, per-client read and write
//! pumps, and interest-filtered state broadcast with per-client diffing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use shared::{
    MoveIntent, Packet, PlayerState, StateDelta, StateSnapshot, Welcome, CHUNK_RADIUS,
    CHUNK_SIZE_TILES, OUTBOUND_BUFFER, PACKET_MOVE_INTENT, PACKET_STATE_DELTA,
    PACKET_STATE_SNAPSHOT, PACKET_WELCOME, WRITE_DEADLINE,
};

use crate::auth::Authenticator;
use crate::world::{PlayerView, World};

/// Upper bound on draining outstanding pumps at shutdown.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// One connected client. The hub enqueues packets without blocking; the
/// write pump is the sole consumer of the outbound queue.
struct ClientSession {
    serial: u64,
    user_id: String,
    outbound: mpsc::Sender<Packet>,
    last_sent: Mutex<HashMap<String, (i64, i64)>>,
    closed: AtomicBool,
    close_signal: Notify,
}

impl ClientSession {
    /// Idempotent close. Wakes the write pump, which owns the socket sink.
    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.close_signal.notify_one();
        }
    }
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<u64, Arc<ClientSession>>,
    by_user: HashMap<String, u64>,
}

/// The session hub. Holds a handle to the world and the registry of live
/// client sessions; at most one session per user id is registered.
pub struct Hub {
    world: Arc<World>,
    auth: Arc<dyn Authenticator>,
    registry: RwLock<Registry>,
    next_serial: AtomicU64,
    last_tick: AtomicI64,
    pumps: Mutex<Vec<JoinHandle<()>>>,
}

impl Hub {
    pub fn new(world: Arc<World>, auth: Arc<dyn Authenticator>) -> Self {
        Hub {
            world,
            auth,
            registry: RwLock::new(Registry::default()),
            next_serial: AtomicU64::new(1),
            last_tick: AtomicI64::new(0),
            pumps: Mutex::new(Vec::new()),
        }
    }

    /// Accepts connections until the shutdown flag flips. Each accepted
    /// socket is upgraded and pumped on its own tasks.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!("connection from {}", peer);
                            tokio::spawn(self.clone().handle_connection(stream));
                        }
                        Err(err) => {
                            error!("accept error: {}", err);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    /// Upgrades one socket. The handshake callback authenticates the token
    /// query parameter before the websocket is established, so rejections go
    /// out as plain HTTP statuses.
    pub async fn handle_connection(self: Arc<Self>, stream: TcpStream) {
        let mut user_id: Option<String> = None;
        let auth = self.auth.clone();

        let callback = |request: &Request, response: Response| {
            if request.uri().path() != "/ws" {
                return Err(reject(StatusCode::NOT_FOUND));
            }

            let token = query_param(request.uri().query().unwrap_or(""), "token");
            let Some(token) = token else {
                return Err(reject(StatusCode::UNAUTHORIZED));
            };

            match auth.authenticate(&token) {
                Ok(Some(id)) => {
                    user_id = Some(id);
                    Ok(response)
                }
                Ok(None) => Err(reject(StatusCode::UNAUTHORIZED)),
                Err(err) => {
                    warn!("auth error: {}", err);
                    Err(reject(StatusCode::INTERNAL_SERVER_ERROR))
                }
            }
        };

        let ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
            Ok(ws) => ws,
            Err(err) => {
                debug!("ws upgrade failed: {}", err);
                return;
            }
        };

        let Some(user_id) = user_id else {
            return;
        };
        self.admit(user_id, ws).await;
    }

    async fn admit(self: Arc<Self>, user_id: String, ws: WebSocketStream<TcpStream>) {
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let session = Arc::new(ClientSession {
            serial,
            user_id: user_id.clone(),
            outbound,
            last_sent: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            close_signal: Notify::new(),
        });

        // One live session per user: the registry swap is atomic, so of two
        // racing connects exactly one survives and the other is evicted.
        let prior = {
            let mut registry = write_lock(&self.registry);
            let prior = registry
                .by_user
                .insert(user_id.clone(), serial)
                .and_then(|old| registry.sessions.remove(&old));
            registry.sessions.insert(serial, session.clone());
            prior
        };

        if let Some(prior) = prior {
            info!("displacing existing session for {}", user_id);
            self.world.remove_player(&prior.user_id);
            prior.close();
        }

        self.world.add_player(&user_id);
        self.send_packet(&session, PACKET_WELCOME, &Welcome { id: user_id.clone() });
        self.send_snapshot(&session);

        let (sink, stream) = ws.split();
        let writer = tokio::spawn(Self::write_pump(self.clone(), session.clone(), sink, outbound_rx));
        let reader = tokio::spawn(Self::read_pump(self.clone(), session.clone(), stream));
        self.track(writer);
        self.track(reader);

        info!("session {} opened for {}", serial, user_id);
    }

    /// Tears one session down: unregister, drop its world entity, close the
    /// queue and socket. Safe to call from either pump, displacement, or
    /// shutdown; only the first caller observes the registered state.
    fn remove_session(&self, session: &ClientSession) {
        let registered = {
            let mut registry = write_lock(&self.registry);
            if registry.sessions.remove(&session.serial).is_some() {
                // Displacement may have re-pointed the user entry at a newer
                // session; only clear it when it is still ours.
                if registry.by_user.get(&session.user_id) == Some(&session.serial) {
                    registry.by_user.remove(&session.user_id);
                }
                true
            } else {
                false
            }
        };

        if registered {
            self.world.remove_player(&session.user_id);
            info!("session {} closed for {}", session.serial, session.user_id);
        }
        session.close();
    }

    /// Diffs the current interest set against what each client last saw and
    /// enqueues deltas. Called by the tick driver only on dirty ticks.
    pub fn broadcast_state(&self, tick: i64) {
        self.last_tick.store(tick, Ordering::SeqCst);

        let sessions: Vec<Arc<ClientSession>> = {
            let registry = read_lock(&self.registry);
            registry.sessions.values().cloned().collect()
        };

        for session in sessions {
            self.send_delta(&session, tick);
        }
    }

    /// Closes every session and waits up to [`SHUTDOWN_TIMEOUT`] for the
    /// pumps to drain.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<ClientSession>> = {
            let registry = read_lock(&self.registry);
            registry.sessions.values().cloned().collect()
        };
        for session in sessions {
            self.remove_session(&session);
        }

        let handles = std::mem::take(&mut *lock(&self.pumps));
        let drain = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await.is_err() {
            warn!("pumps still running after {:?}", SHUTDOWN_TIMEOUT);
        }
    }

    pub fn session_count(&self) -> usize {
        read_lock(&self.registry).sessions.len()
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut pumps = lock(&self.pumps);
        pumps.retain(|pump| !pump.is_finished());
        pumps.push(handle);
    }

    /// Non-blocking enqueue. A full queue drops the packet; a stalled client
    /// must not stall the tick loop.
    fn send_packet<T: Serialize>(&self, session: &ClientSession, packet_type: &str, payload: &T) {
        let packet = match Packet::new(packet_type, payload) {
            Ok(packet) => packet,
            Err(err) => {
                warn!("packet encode failed ({}): {}", session.user_id, err);
                return;
            }
        };

        if session.outbound.try_send(packet).is_err() {
            debug!(
                "outbound queue full, dropping {} for {}",
                packet_type, session.user_id
            );
        }
    }

    fn send_snapshot(&self, session: &ClientSession) {
        let tick = self.last_tick.load(Ordering::SeqCst);
        let Some(players) =
            self.world
                .snapshot_interest(&session.user_id, CHUNK_RADIUS, CHUNK_SIZE_TILES)
        else {
            return;
        };

        let states: Vec<PlayerState> = players.iter().map(state_of).collect();
        *lock(&session.last_sent) = sent_map(&players);

        self.send_packet(
            session,
            PACKET_STATE_SNAPSHOT,
            &StateSnapshot {
                tick,
                players: states,
            },
        );
    }

    fn send_delta(&self, session: &ClientSession, tick: i64) {
        let Some(players) =
            self.world
                .snapshot_interest(&session.user_id, CHUNK_RADIUS, CHUNK_SIZE_TILES)
        else {
            return;
        };

        let mut last_sent = lock(&session.last_sent);
        let (changed, removed) = diff_states(&last_sent, &players);
        if changed.is_empty() && removed.is_empty() {
            return;
        }

        // The new mapping is recorded whether or not the enqueue below
        // succeeds; a dropped delta is caught up on the next dirty tick.
        *last_sent = sent_map(&players);
        drop(last_sent);

        self.send_packet(
            session,
            PACKET_STATE_DELTA,
            &StateDelta {
                tick,
                players: changed,
                removed,
            },
        );
    }

    async fn read_pump(
        hub: Arc<Hub>,
        session: Arc<ClientSession>,
        mut stream: SplitStream<WebSocketStream<TcpStream>>,
    ) {
        while let Some(message) = stream.next().await {
            let message = match message {
                Ok(message) => message,
                Err(err) => {
                    debug!("read error ({}): {}", session.user_id, err);
                    break;
                }
            };

            let text = match &message {
                Message::Text(text) => text.as_str(),
                Message::Binary(data) => match std::str::from_utf8(data) {
                    Ok(text) => text,
                    Err(_) => {
                        warn!("non-UTF8 frame from {}", session.user_id);
                        break;
                    }
                },
                Message::Close(_) => break,
                // Ping and pong are answered by the protocol layer.
                _ => continue,
            };

            let packet: Packet = match serde_json::from_str(text) {
                Ok(packet) => packet,
                Err(err) => {
                    warn!("undecodable packet from {}: {}", session.user_id, err);
                    break;
                }
            };

            hub.handle_packet(&session, &packet);
        }

        hub.remove_session(&session);
    }

    fn handle_packet(&self, session: &ClientSession, packet: &Packet) {
        match packet.packet_type.as_str() {
            PACKET_MOVE_INTENT => {
                let intent: MoveIntent = match packet.decode_payload() {
                    Ok(intent) => intent,
                    Err(err) => {
                        warn!("invalid move intent ({}): {}", session.user_id, err);
                        return;
                    }
                };
                // A rejected target is dropped without a wire signal.
                let _ = self.world.set_target(&session.user_id, intent.x, intent.y);
            }
            _ => {}
        }
    }

    async fn write_pump(
        hub: Arc<Hub>,
        session: Arc<ClientSession>,
        mut sink: SplitSink<WebSocketStream<TcpStream>, Message>,
        mut outbound: mpsc::Receiver<Packet>,
    ) {
        loop {
            let packet = tokio::select! {
                _ = session.close_signal.notified() => break,
                maybe = outbound.recv() => match maybe {
                    Some(packet) => packet,
                    None => break,
                },
            };

            if !Self::write_one(&session, &mut sink, packet).await {
                break;
            }
        }

        // Drain whatever was already queued before the close.
        while let Ok(packet) = outbound.try_recv() {
            if !Self::write_one(&session, &mut sink, packet).await {
                break;
            }
        }

        let _ = sink.close().await;
        hub.remove_session(&session);
    }

    async fn write_one(
        session: &ClientSession,
        sink: &mut SplitSink<WebSocketStream<TcpStream>, Message>,
        packet: Packet,
    ) -> bool {
        let text = match serde_json::to_string(&packet) {
            Ok(text) => text,
            Err(err) => {
                warn!("packet encode failed ({}): {}", session.user_id, err);
                return true;
            }
        };

        match tokio::time::timeout(WRITE_DEADLINE, sink.send(Message::Text(text))).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                debug!("write error ({}): {}", session.user_id, err);
                false
            }
            Err(_) => {
                debug!("write deadline exceeded ({})", session.user_id);
                false
            }
        }
    }
}

fn state_of(player: &PlayerView) -> PlayerState {
    PlayerState {
        id: player.id.clone(),
        x: player.x,
        y: player.y,
    }
}

fn sent_map(players: &[PlayerView]) -> HashMap<String, (i64, i64)> {
    players
        .iter()
        .map(|player| (player.id.clone(), (player.x, player.y)))
        .collect()
}

/// Players that are new or moved since `prev`, and ids that left the set.
fn diff_states(
    prev: &HashMap<String, (i64, i64)>,
    players: &[PlayerView],
) -> (Vec<PlayerState>, Vec<String>) {
    let changed = players
        .iter()
        .filter(|player| prev.get(&player.id) != Some(&(player.x, player.y)))
        .map(state_of)
        .collect();

    let removed = prev
        .keys()
        .filter(|id| !players.iter().any(|player| &player.id == *id))
        .cloned()
        .collect();

    (changed, removed)
}

/// Extracts a query parameter from a raw query string. Session tokens are
/// URL-safe hex, so no percent-decoding happens here.
fn query_param(query: &str, key: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key && !v.is_empty()).then(|| v.to_string())
    })
}

fn reject(status: StatusCode) -> ErrorResponse {
    let mut response = ErrorResponse::new(None);
    *response.status_mut() = status;
    response
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read_lock(lock: &RwLock<Registry>) -> std::sync::RwLockReadGuard<'_, Registry> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock(lock: &RwLock<Registry>) -> std::sync::RwLockWriteGuard<'_, Registry> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
