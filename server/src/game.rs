use log::info;
use rand::Rng;
use shared::{base_cell, in_bounds, manhattan_distance, player_color, Cell, Player, MAX_PLAYERS};
use std::collections::{BTreeMap, HashSet};

/// Copy of the world handed to the broadcast loop, players sorted by id.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub players: Vec<Player>,
    pub flag: Cell,
    pub locked_cells: Vec<Cell>,
}

#[derive(Debug, Clone)]
pub struct GameState {
    grid_size: i32,
    players: BTreeMap<u8, Player>,
    flag_pos: Cell,
    bases: BTreeMap<u8, Cell>,
    locked_cells: HashSet<Cell>,
}

impl GameState {
    pub fn new(grid_size: i32) -> Self {
        Self::with_players(grid_size, &[])
    }

    /// Builds a session with the given players standing at their home
    /// corners and the flag at a random free cell.
    pub fn with_players(grid_size: i32, player_ids: &[u8]) -> Self {
        let mut players = BTreeMap::new();
        for &id in player_ids {
            players.insert(id, Player::new(id, base_cell(grid_size, id), player_color(id)));
        }

        let bases = (1..=MAX_PLAYERS as u8)
            .map(|id| (id, base_cell(grid_size, id)))
            .collect();

        let mut state = Self {
            grid_size,
            players,
            flag_pos: (grid_size / 2, grid_size / 2),
            bases,
            locked_cells: HashSet::new(),
        };
        state.flag_pos = state.random_flag_position();
        state
    }

    /// Applies one already-validated step for a player. Moves that leave the
    /// grid, enter a locked cell, or enter an occupied cell are dropped
    /// without touching the world.
    pub fn move_player(&mut self, player_id: u8, dx: i32, dy: i32) {
        let (from, carrying) = match self.players.get(&player_id) {
            Some(player) => (player.pos, player.has_flag),
            None => return,
        };
        let target = (from.0 + dx, from.1 + dy);

        if !in_bounds(self.grid_size, target)
            || self.locked_cells.contains(&target)
            || self.is_cell_occupied(target, Some(player_id))
        {
            return;
        }

        if carrying {
            // A capture cell stays locked only while the carrier is on it.
            self.locked_cells.remove(&self.flag_pos);
            self.flag_pos = target;
        }
        if let Some(player) = self.players.get_mut(&player_id) {
            player.pos = target;
        }

        self.try_steal(player_id, target);
        self.try_capture(player_id, target);
        self.try_return(player_id, target);
    }

    /// A non-carrier ending its move next to the carrier takes the flag.
    fn try_steal(&mut self, player_id: u8, pos: Cell) {
        debug_assert!(self.players.values().filter(|p| p.has_flag).count() <= 1);
        if self.players.get(&player_id).map_or(true, |p| p.has_flag) {
            return;
        }
        let victim = self
            .players
            .iter()
            .find(|(id, other)| {
                **id != player_id && other.has_flag && manhattan_distance(other.pos, pos) == 1
            })
            .map(|(id, _)| *id);

        if let Some(victim_id) = victim {
            if let Some(other) = self.players.get_mut(&victim_id) {
                other.has_flag = false;
            }
            // The flag, and any lock left on its cell, follows the thief.
            self.locked_cells.remove(&self.flag_pos);
            self.flag_pos = pos;
            if let Some(player) = self.players.get_mut(&player_id) {
                player.has_flag = true;
            }
            info!("Player {} stole the flag from player {}", player_id, victim_id);
        }
    }

    /// Ending a move on the resting flag picks it up and locks its cell.
    fn try_capture(&mut self, player_id: u8, target: Cell) {
        if target != self.flag_pos || self.players.values().any(|p| p.has_flag) {
            return;
        }
        if let Some(player) = self.players.get_mut(&player_id) {
            player.has_flag = true;
            self.locked_cells.insert(target);
            info!("Player {} captured the flag at {:?}", player_id, target);
        }
    }

    /// A carrier reaching its own base scores, then the flag respawns.
    fn try_return(&mut self, player_id: u8, target: Cell) {
        if self.bases.get(&player_id) != Some(&target) {
            return;
        }
        match self.players.get_mut(&player_id) {
            Some(player) if player.has_flag => {
                player.has_flag = false;
                player.score += 1;
            }
            _ => return,
        }
        self.locked_cells.clear();
        self.flag_pos = self.random_flag_position();
        info!("Player {} returned the flag and scored", player_id);
    }

    pub fn remove_player(&mut self, player_id: u8) {
        let removed = match self.players.remove(&player_id) {
            Some(player) => player,
            None => return,
        };
        if removed.has_flag {
            // Never let a departing carrier take the flag out of play.
            self.locked_cells.clear();
            self.flag_pos = self.random_flag_position();
        }
        info!("Removed player {} from the session", player_id);
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            players: self.players.values().cloned().collect(),
            flag: self.flag_pos,
            locked_cells: self.locked_cells.iter().copied().collect(),
        }
    }

    pub fn player(&self, player_id: u8) -> Option<&Player> {
        self.players.get(&player_id)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn flag_pos(&self) -> Cell {
        self.flag_pos
    }

    pub fn is_locked(&self, cell: Cell) -> bool {
        self.locked_cells.contains(&cell)
    }

    fn is_base(&self, cell: Cell) -> bool {
        self.bases.values().any(|&base| base == cell)
    }

    fn is_cell_occupied(&self, cell: Cell, exclude: Option<u8>) -> bool {
        self.players
            .values()
            .any(|player| Some(player.id) != exclude && player.pos == cell)
    }

    /// Rejection-samples a cell that is neither a base nor under a player.
    fn random_flag_position(&self) -> Cell {
        let mut rng = rand::thread_rng();
        loop {
            let candidate = (
                rng.gen_range(0..self.grid_size),
                rng.gen_range(0..self.grid_size),
            );
            if !self.is_base(candidate) && !self.is_cell_occupied(candidate, None) {
                return candidate;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn place_player(&mut self, player_id: u8, pos: Cell) {
        if let Some(player) = self.players.get_mut(&player_id) {
            player.pos = pos;
        }
    }

    #[cfg(test)]
    pub(crate) fn set_flag(&mut self, pos: Cell) {
        self.flag_pos = pos;
    }

    #[cfg(test)]
    pub(crate) fn give_flag(&mut self, player_id: u8) {
        if let Some(player) = self.players.get_mut(&player_id) {
            player.has_flag = true;
            self.flag_pos = player.pos;
        }
    }
}
