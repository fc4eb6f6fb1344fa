//! Server network layer handling TCP connections and the broadcast loop

use crate::lobby::ClientHandle;
use crate::state::ServerState;
use log::{error, info, warn};
use shared::{to_line, ClientMessage, ServerMessage};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Take};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::{interval, timeout, MissedTickBehavior};

/// Upper bound on a single send so one stalled client cannot hold the
/// tick hostage for everyone else.
const SEND_TIMEOUT: Duration = Duration::from_millis(500);

/// Upper bound on one accepted input line. Real messages are a fraction of
/// this; anything longer is treated as malformed and discarded.
const MAX_LINE_BYTES: u64 = 8 * 1024;

/// Main server owning the listener, the shared state and the tick cadence
pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
    tick_duration: Duration,
}

impl Server {
    pub async fn new(
        addr: &str,
        tick_duration: Duration,
        grid_size: i32,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Server {
            listener,
            state: Arc::new(ServerState::new(grid_size)),
            tick_duration,
        })
    }

    /// Address the listener actually bound, handy when asking for port 0
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Main accept loop coordinating all operations
    ///
    /// Spawns the broadcast loop, then accepts connections until ctrl-c.
    /// Each connection gets its own task. On shutdown every connected
    /// client is sent a server_down notice before the loop exits.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_broadcast_loop();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let state = Arc::clone(&self.state);
                            tokio::spawn(async move {
                                handle_connection(state, stream, addr).await;
                            });
                        }
                        Err(e) => error!("Failed to accept connection: {}", e),
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    self.notify_shutdown().await;
                    break;
                }
            }
        }

        Ok(())
    }

    /// Spawns the task that pushes world snapshots at the tick rate
    fn spawn_broadcast_loop(&self) {
        let state = Arc::clone(&self.state);
        let tick_duration = self.tick_duration;

        tokio::spawn(async move {
            let mut ticker = interval(tick_duration);
            // A late tick is skipped rather than replayed in a burst.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                broadcast_game_state(&state).await;
            }
        });
    }

    async fn notify_shutdown(&self) {
        let notice = ServerMessage::ServerDown {
            message: "Server is shutting down. Disconnecting...".to_string(),
        };
        let handles = self.state.client_handles().await;
        send_to_all(&handles, &notice).await;
    }
}

/// Drives one client connection from seating to cleanup
async fn handle_connection(state: Arc<ServerState>, stream: TcpStream, addr: SocketAddr) {
    info!("Client connected from {}", addr);

    let (read_half, write_half) = stream.into_split();
    let handle: ClientHandle = Arc::new(Mutex::new(write_half));

    let seat = match state.join(Arc::clone(&handle), addr).await {
        Some(seat) => seat,
        None => {
            // Full house: the connection is dropped without being seated.
            info!("Rejecting {}: lobby is full", addr);
            return;
        }
    };

    // The joiner learns its seat first, then everyone sees the new roster.
    let init = state.lobby_init_message(seat).await;
    if let Err(e) = send_message(&handle, &init).await {
        warn!("Failed to greet seat {}: {}", seat, e);
    }
    broadcast_lobby_state(&state).await;

    read_messages(&state, read_half, seat, addr).await;

    // One cleanup pass per connection, however the read loop ended.
    state.leave(seat).await;
    state.remove_player(seat).await;
    broadcast_game_state(&state).await;
    broadcast_lobby_state(&state).await;
    info!("Client {} disconnected (seat {})", addr, seat);
}

/// Reads newline-framed JSON messages until EOF, a read error or an
/// explicit disconnect request. Malformed, non-UTF-8 and over-long lines
/// (past MAX_LINE_BYTES) are logged and skipped, the connection lives on.
async fn read_messages(
    state: &ServerState,
    read_half: OwnedReadHalf,
    seat: usize,
    addr: SocketAddr,
) {
    let mut reader = BufReader::new(read_half).take(MAX_LINE_BYTES);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        reader.set_limit(MAX_LINE_BYTES);
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                // Cap reached before the terminator: the line is too long
                // to ever parse, drop it and resync at the next newline.
                if !buf.ends_with(b"\n") && reader.limit() == 0 {
                    warn!("Discarding oversized line from {}", addr);
                    if !drain_to_newline(&mut reader).await {
                        break;
                    }
                    continue;
                }
                let line = match std::str::from_utf8(&buf) {
                    Ok(line) => line,
                    Err(_) => {
                        warn!("Skipping non-UTF-8 line from {}", addr);
                        continue;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<ClientMessage>(line) {
                    Ok(message) => {
                        if !dispatch(state, seat, message).await {
                            break;
                        }
                    }
                    Err(e) => warn!("Skipping malformed line from {}: {}", addr, e),
                }
            }
            Err(e) => {
                warn!("Read error from {}: {}", addr, e);
                break;
            }
        }
    }
}

/// Drops the remainder of an over-long line in capped chunks. Returns false
/// when the stream ends or errors before the terminator shows up.
async fn drain_to_newline(reader: &mut Take<BufReader<OwnedReadHalf>>) -> bool {
    let mut scrap = Vec::new();
    loop {
        scrap.clear();
        reader.set_limit(MAX_LINE_BYTES);
        match reader.read_until(b'\n', &mut scrap).await {
            Ok(0) => return false,
            Ok(_) if scrap.ends_with(b"\n") => return true,
            Ok(_) => continue,
            Err(_) => return false,
        }
    }
}

/// Routes one parsed message. Returns false when the connection should close.
async fn dispatch(state: &ServerState, seat: usize, message: ClientMessage) -> bool {
    match message {
        ClientMessage::Input { player_id, step } => {
            // The acting seat comes from the connection, never the payload.
            if player_id != seat {
                warn!("Seat {} sent input claiming seat {}", seat, player_id);
            }
            state.apply_move(seat, step).await;
            true
        }
        ClientMessage::Ready { player_id } => {
            if player_id != seat {
                warn!("Seat {} sent ready claiming seat {}", seat, player_id);
            }
            state.toggle_ready(seat).await;
            broadcast_lobby_state(state).await;
            true
        }
        ClientMessage::StartRequest { .. } => {
            if let Some(handles) = state.start_game(seat).await {
                send_to_all(&handles, &ServerMessage::GameStart).await;
            }
            true
        }
        ClientMessage::Disconnect { .. } => {
            info!("Seat {} requested disconnect", seat);
            false
        }
    }
}

/// Sends the current world snapshot to every connected client
async fn broadcast_game_state(state: &ServerState) {
    let handles = state.client_handles().await;
    if handles.is_empty() {
        return;
    }

    let snapshot = state.snapshot().await;
    let update = ServerMessage::Update {
        players: snapshot.players,
        flag: snapshot.flag,
        locked_cells: snapshot.locked_cells,
    };
    send_to_all(&handles, &update).await;
}

async fn broadcast_lobby_state(state: &ServerState) {
    let handles = state.client_handles().await;
    if handles.is_empty() {
        return;
    }
    let update = state.lobby_update_message().await;
    send_to_all(&handles, &update).await;
}

/// Serializes once and fans the frame out to every handle
///
/// Send failures are logged per seat and do not stop the fan-out. Actual
/// disconnect cleanup stays with each connection's own handler.
async fn send_to_all(handles: &[(usize, ClientHandle)], message: &ServerMessage) {
    let line = match to_line(message) {
        Ok(line) => line,
        Err(e) => {
            error!("Failed to serialize broadcast: {}", e);
            return;
        }
    };

    for (seat, handle) in handles {
        if let Err(e) = send_line(handle, &line).await {
            warn!("Failed to send to seat {}: {}", seat, e);
        }
    }
}

async fn send_message(handle: &ClientHandle, message: &ServerMessage) -> std::io::Result<()> {
    let line = to_line(message).map_err(std::io::Error::from)?;
    send_line(handle, &line).await
}

/// Writes one frame under the per-socket lock, bounded by SEND_TIMEOUT
async fn send_line(handle: &ClientHandle, line: &str) -> std::io::Result<()> {
    let mut writer = handle.lock().await;
    match timeout(SEND_TIMEOUT, writer.write_all(line.as_bytes())).await {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "send timed out",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Move;

    async fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (accepted, connected) =
            tokio::join!(listener.accept(), TcpStream::connect(addr));
        (accepted.unwrap().0, connected.unwrap())
    }

    #[tokio::test]
    async fn test_send_line_delivers_one_frame() {
        let (server_side, client_side) = tcp_pair().await;
        let handle: ClientHandle = Arc::new(Mutex::new(server_side.into_split().1));

        send_line(&handle, "{\"type\":\"game_start\"}\n").await.unwrap();

        let mut lines = BufReader::new(client_side).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        assert_eq!(line, "{\"type\":\"game_start\"}");
    }

    #[tokio::test]
    async fn test_send_to_all_survives_a_closed_socket() {
        let (dead_server_side, _dead_client) = tcp_pair().await;
        let (live_server_side, live_client) = tcp_pair().await;

        let dead: ClientHandle = Arc::new(Mutex::new(dead_server_side.into_split().1));
        let live: ClientHandle = Arc::new(Mutex::new(live_server_side.into_split().1));
        dead.lock().await.shutdown().await.unwrap();

        let handles = vec![(0, Arc::clone(&dead)), (1, Arc::clone(&live))];
        send_to_all(&handles, &ServerMessage::GameStart).await;

        let mut lines = BufReader::new(live_client).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        assert!(line.contains("game_start"));
    }

    #[tokio::test]
    async fn test_broadcast_with_no_clients_is_a_no_op() {
        let state = ServerState::new(15);
        broadcast_game_state(&state).await;
        broadcast_lobby_state(&state).await;
    }

    #[tokio::test]
    async fn test_dispatch_reports_when_to_close() {
        let state = ServerState::new(15);

        let keep = dispatch(
            &state,
            0,
            ClientMessage::Input {
                player_id: 0,
                step: Move { dx: 1, dy: 0 },
            },
        )
        .await;
        assert!(keep);

        let keep = dispatch(&state, 0, ClientMessage::Disconnect { player_id: 0 }).await;
        assert!(!keep);
    }

    #[tokio::test]
    async fn test_start_request_without_quorum_stays_silent() {
        let (server_side, client_side) = tcp_pair().await;
        let handle: ClientHandle = Arc::new(Mutex::new(server_side.into_split().1));

        let state = ServerState::new(15);
        let seat = state.join(handle, client_side.peer_addr().unwrap()).await.unwrap();

        let keep = dispatch(&state, seat, ClientMessage::StartRequest { player_id: seat }).await;
        assert!(keep);
        assert!(state.snapshot().await.players.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_line_is_skipped_like_malformed() {
        let (server_side, mut client_side) = tcp_pair().await;
        let peer = server_side.peer_addr().unwrap();
        let (read_half, write_half) = server_side.into_split();

        let state = ServerState::new(15);
        let seat = state
            .join(Arc::new(Mutex::new(write_half)), peer)
            .await
            .unwrap();

        let writer = tokio::spawn(async move {
            let blob = vec![b'x'; 3 * MAX_LINE_BYTES as usize];
            client_side.write_all(&blob).await.unwrap();
            client_side.write_all(b"\n").await.unwrap();
            let ready = to_line(&ClientMessage::Ready { player_id: seat }).unwrap();
            client_side.write_all(ready.as_bytes()).await.unwrap();
            client_side.shutdown().await.unwrap();
        });

        read_messages(&state, read_half, seat, peer).await;
        writer.await.unwrap();

        // The ready toggle after the flood proves the reader resynced.
        match state.lobby_update_message().await {
            ServerMessage::LobbyUpdate { ready_states, .. } => assert!(ready_states[seat]),
            _ => panic!("Wrong message type"),
        }
    }

    #[tokio::test]
    async fn test_non_utf8_line_is_skipped() {
        let (server_side, mut client_side) = tcp_pair().await;
        let peer = server_side.peer_addr().unwrap();
        let (read_half, write_half) = server_side.into_split();

        let state = ServerState::new(15);
        let seat = state
            .join(Arc::new(Mutex::new(write_half)), peer)
            .await
            .unwrap();

        let writer = tokio::spawn(async move {
            client_side.write_all(&[0xff, 0xfe, 0xfd, b'\n']).await.unwrap();
            let ready = to_line(&ClientMessage::Ready { player_id: seat }).unwrap();
            client_side.write_all(ready.as_bytes()).await.unwrap();
            client_side.shutdown().await.unwrap();
        });

        read_messages(&state, read_half, seat, peer).await;
        writer.await.unwrap();

        match state.lobby_update_message().await {
            ServerMessage::LobbyUpdate { ready_states, .. } => assert!(ready_states[seat]),
            _ => panic!("Wrong message type"),
        }
    }
}
