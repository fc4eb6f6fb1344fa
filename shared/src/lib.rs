use serde::{Deserialize, Serialize};

pub const MAX_PLAYERS: usize = 4;
pub const DEFAULT_GRID_SIZE: i32 = 15;
pub const DEFAULT_TICK_RATE: u32 = 30;
pub const DEFAULT_PORT: u16 = 12345;
pub const MIN_PLAYERS_TO_START: usize = 2;

/// Grid coordinate as (x, y). Serializes to a two-element JSON array.
pub type Cell = (i32, i32);

/// Seats on the wire are 0-based, in-game player ids are 1-based.
/// Every conversion between the two goes through here.
pub fn player_id_for_seat(seat: usize) -> u8 {
    debug_assert!(seat < MAX_PLAYERS);
    seat as u8 + 1
}

pub fn player_color(player_id: u8) -> (u8, u8, u8) {
    match player_id {
        1 => (255, 0, 0),
        2 => (0, 0, 255),
        3 => (255, 255, 0),
        _ => (0, 255, 255),
    }
}

/// Home corner for a player id on a square grid of the given size.
pub fn base_cell(grid_size: i32, player_id: u8) -> Cell {
    match player_id {
        1 => (0, 0),
        2 => (grid_size - 1, 0),
        3 => (0, grid_size - 1),
        _ => (grid_size - 1, grid_size - 1),
    }
}

pub fn in_bounds(grid_size: i32, cell: Cell) -> bool {
    cell.0 >= 0 && cell.0 < grid_size && cell.1 >= 0 && cell.1 < grid_size
}

pub fn manhattan_distance(a: Cell, b: Cell) -> i32 {
    (a.0 - b.0).abs() + (a.1 - b.1).abs()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Player {
    pub id: u8,
    pub pos: Cell,
    pub color: (u8, u8, u8),
    pub has_flag: bool,
    pub score: u32,
}

impl Player {
    pub fn new(id: u8, pos: Cell, color: (u8, u8, u8)) -> Self {
        Self {
            id,
            pos,
            color,
            has_flag: false,
            score: 0,
        }
    }
}

/// One requested movement step. Legal steps are the four cardinal
/// directions, one cell at a time.
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct Move {
    pub dx: i32,
    pub dy: i32,
}

impl Move {
    // Matched exactly: deltas come straight off the wire, and summing
    // their `abs` values overflows on extremes like `i32::MIN`.
    pub fn is_unit_step(&self) -> bool {
        matches!((self.dx, self.dy), (1, 0) | (-1, 0) | (0, 1) | (0, -1))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Input {
        player_id: usize,
        #[serde(rename = "move")]
        step: Move,
    },
    Ready {
        player_id: usize,
    },
    StartRequest {
        player_id: usize,
    },
    Disconnect {
        player_id: usize,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    LobbyInit {
        your_id: usize,
        is_host: bool,
        players: [Option<String>; MAX_PLAYERS],
        ready_states: [bool; MAX_PLAYERS],
        can_start: bool,
    },
    LobbyUpdate {
        players: [Option<String>; MAX_PLAYERS],
        ready_states: [bool; MAX_PLAYERS],
        can_start: bool,
    },
    GameStart,
    Update {
        players: Vec<Player>,
        flag: Cell,
        locked_cells: Vec<Cell>,
    },
    ServerDown {
        message: String,
    },
}

/// Encodes a message as one newline-terminated JSON frame.
pub fn to_line<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}
