//! Shared server state and the atomic operations tasks use to touch it
//!
//! Connection handlers and the broadcast loop never reach into the lobby
//! or the game world directly. Everything goes through [`ServerState`],
//! which hides one lock per component and keeps each operation a single
//! short critical section.

use crate::game::{GameState, Snapshot};
use crate::lobby::{ClientHandle, Lobby};
use log::{debug, info};
use shared::{player_id_for_seat, Move, ServerMessage};
use std::net::SocketAddr;
use tokio::sync::Mutex;

pub struct ServerState {
    lobby: Mutex<Lobby>,
    session: Mutex<GameState>,
    grid_size: i32,
}

impl ServerState {
    pub fn new(grid_size: i32) -> Self {
        Self {
            lobby: Mutex::new(Lobby::new()),
            session: Mutex::new(GameState::new(grid_size)),
            grid_size,
        }
    }

    /// Seats a new connection, returning its seat number if there is room.
    pub async fn join(&self, handle: ClientHandle, addr: SocketAddr) -> Option<usize> {
        self.lobby.lock().await.join(handle, addr)
    }

    /// Releases a seat. Safe to call for seats that are already free.
    pub async fn leave(&self, seat: usize) {
        self.lobby.lock().await.leave(seat);
    }

    pub async fn toggle_ready(&self, seat: usize) {
        self.lobby.lock().await.toggle_ready(seat);
    }

    pub async fn lobby_init_message(&self, seat: usize) -> ServerMessage {
        self.lobby.lock().await.init_message(seat)
    }

    pub async fn lobby_update_message(&self) -> ServerMessage {
        self.lobby.lock().await.update_message()
    }

    /// Socket handles for every occupied seat, for fan-out sends.
    pub async fn client_handles(&self) -> Vec<(usize, ClientHandle)> {
        self.lobby.lock().await.handles()
    }

    /// Validates one movement input from a seat and applies it to the
    /// session. Anything but a single-cell cardinal step is dropped here,
    /// before the rules engine ever sees it.
    pub async fn apply_move(&self, seat: usize, step: Move) {
        if !step.is_unit_step() {
            debug!("Dropping non-unit step {:?} from seat {}", step, seat);
            return;
        }
        let player_id = player_id_for_seat(seat);
        self.session.lock().await.move_player(player_id, step.dx, step.dy);
    }

    /// Removes a seat's player from the running session, if present.
    pub async fn remove_player(&self, seat: usize) {
        self.session.lock().await.remove_player(player_id_for_seat(seat));
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.session.lock().await.snapshot()
    }

    /// Starts a fresh game if enough seated players are ready.
    ///
    /// Readiness is read and the new session swapped in under the lobby
    /// lock, so a racing move lands on either the old world or the new
    /// one, never on a half-built session. This is the only place both
    /// locks are held at once, always lobby first.
    pub async fn start_game(&self, seat: usize) -> Option<Vec<(usize, ClientHandle)>> {
        let lobby = self.lobby.lock().await;
        if !lobby.can_start() {
            debug!("Seat {} requested a start without a ready quorum", seat);
            return None;
        }

        let player_ids = lobby.ready_player_ids();
        *self.session.lock().await = GameState::with_players(self.grid_size, &player_ids);

        info!("Seat {} started a game with players {:?}", seat, player_ids);
        Some(lobby.handles())
    }
}
