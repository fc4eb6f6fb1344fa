//! # Capture Session Server Library
//!
//! This library provides the authoritative server for a small grid-based
//! capture-the-flag game. It owns the canonical world state, applies every
//! movement rule on the server side, and streams snapshots to all connected
//! clients so that nothing a client claims about itself is ever trusted.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! Every move request is validated and resolved here. Clients only render
//! what the server says: positions, the flag, scores and locked cells all
//! come from the broadcast state, never from local prediction.
//!
//! ### Lobby Management
//! Up to four players occupy fixed seats. The lobby tracks occupancy and
//! ready flags, gates game starts on a two-player quorum, and recycles
//! seats as clients come and go.
//!
//! ### State Broadcasting
//! An independent loop pushes the full world snapshot to every connected
//! client at a fixed cadence, regardless of whether anything moved.
//!
//! ## Module Organization
//!
//! ### Lobby Module (`lobby`)
//! Seat assignment, ready flags, start gating and the per-seat socket
//! handles used for all outgoing traffic.
//!
//! ### Game Module (`game`)
//! The rules engine: movement validation, flag capture, steals, returns,
//! scoring and flag respawns. Pure data, no IO, no locks.
//!
//! ### State Module (`state`)
//! The shared-state owner. Wraps the lobby and the running session in
//! their own locks and exposes the short atomic operations the network
//! tasks are allowed to use.
//!
//! ### Network Module (`network`)
//! TCP listener, one task per connection, newline-framed JSON messages,
//! the snapshot broadcast loop and shutdown notification.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // 30 snapshots per second on a 15x15 grid
//!     let server = Server::new(
//!         "127.0.0.1:12345",
//!         Duration::from_millis(33),
//!         15,
//!     ).await?;
//!
//!     // Accepts connections until ctrl-c, then notifies clients and exits
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod game;
pub mod lobby;
pub mod network;
pub mod state;
