//! Lobby seat management and start gating for the session server
//!
//! This module handles the pre-game side of the server, including:
//! - Seat assignment (lowest free seat first) and release
//! - Ready flags and the two-player start threshold
//! - Per-seat socket handles used for targeted and broadcast sends
//!
//! The lobby is the only authority on who occupies which seat. Game
//! player ids are derived from seat numbers exactly once, when a game
//! starts.

use log::info;
use shared::{player_id_for_seat, ServerMessage, MAX_PLAYERS, MIN_PLAYERS_TO_START};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

/// Write half of a client socket behind its own lock.
///
/// The connection handler and the broadcast loop both write to the same
/// socket; the lock keeps their frames from interleaving mid-line.
pub type ClientHandle = Arc<Mutex<OwnedWriteHalf>>;

/// Fixed four-seat lobby tracking occupancy, readiness and sockets
///
/// All four arrays are indexed by seat (0 to 3). A seat is occupied
/// exactly when its name slot is filled, and the join and leave paths
/// keep the other arrays in step with it, so a free seat never holds a
/// stale ready flag or socket handle.
#[derive(Default)]
pub struct Lobby {
    /// Display name per seat, None while the seat is free
    names: [Option<String>; MAX_PLAYERS],
    /// Ready flag per seat, always false for free seats
    ready: [bool; MAX_PLAYERS],
    /// Socket write handle per seat for outgoing messages
    handles: [Option<ClientHandle>; MAX_PLAYERS],
    /// Peer address per seat, kept for logging
    addresses: [Option<SocketAddr>; MAX_PLAYERS],
}

impl Lobby {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to seat a new connection
    ///
    /// Returns Some(seat) for the lowest free seat, None if all four are
    /// taken. The seat gets a generated display name and starts not ready.
    pub fn join(&mut self, handle: ClientHandle, addr: SocketAddr) -> Option<usize> {
        let seat = self.names.iter().position(|name| name.is_none())?;

        self.names[seat] = Some(format!("Player_{}", seat + 1));
        self.ready[seat] = false;
        self.handles[seat] = Some(handle);
        self.addresses[seat] = Some(addr);

        info!(
            "Seat {} assigned to {} ({}/{} seats taken)",
            seat,
            addr,
            self.occupied_count(),
            MAX_PLAYERS
        );
        Some(seat)
    }

    /// Releases a seat and everything attached to it
    ///
    /// Freeing an already-free or out-of-range seat is a no-op, so the
    /// disconnect path can call this unconditionally.
    pub fn leave(&mut self, seat: usize) {
        if seat >= MAX_PLAYERS || self.names[seat].is_none() {
            return;
        }

        self.names[seat] = None;
        self.ready[seat] = false;
        self.handles[seat] = None;

        if let Some(addr) = self.addresses[seat].take() {
            info!("Seat {} released ({})", seat, addr);
        }
    }

    /// Flips the ready flag for an occupied seat; ignored for free seats
    pub fn toggle_ready(&mut self, seat: usize) {
        if seat < MAX_PLAYERS && self.names[seat].is_some() {
            self.ready[seat] = !self.ready[seat];
            info!("Seat {} ready: {}", seat, self.ready[seat]);
        }
    }

    /// True once enough seated players are ready to start a game
    pub fn can_start(&self) -> bool {
        self.ready_player_ids().len() >= MIN_PLAYERS_TO_START
    }

    /// Game player ids (1-based) for every seat that is occupied and ready
    pub fn ready_player_ids(&self) -> Vec<u8> {
        (0..MAX_PLAYERS)
            .filter(|&seat| self.names[seat].is_some() && self.ready[seat])
            .map(player_id_for_seat)
            .collect()
    }

    /// Socket handles for every occupied seat
    ///
    /// Used for broadcasting to whoever is connected, in or out of a game.
    pub fn handles(&self) -> Vec<(usize, ClientHandle)> {
        self.handles
            .iter()
            .enumerate()
            .filter_map(|(seat, handle)| handle.as_ref().map(|h| (seat, Arc::clone(h))))
            .collect()
    }

    /// Returns the number of currently occupied seats
    pub fn occupied_count(&self) -> usize {
        self.names.iter().filter(|name| name.is_some()).count()
    }

    /// Returns true if no seats are occupied
    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.names.iter().all(|name| name.is_none())
    }

    /// Builds the one-off greeting for a freshly seated connection
    pub fn init_message(&self, seat: usize) -> ServerMessage {
        ServerMessage::LobbyInit {
            your_id: seat,
            is_host: seat == 0,
            players: self.names.clone(),
            ready_states: self.ready,
            can_start: self.can_start(),
        }
    }

    /// Builds the lobby summary broadcast after every lobby change
    pub fn update_message(&self) -> ServerMessage {
        ServerMessage::LobbyUpdate {
            players: self.names.clone(),
            ready_states: self.ready,
            can_start: self.can_start(),
        }
    }
}
