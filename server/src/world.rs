//! Authoritative world state: player entities, path-following movement, and
//! the change-detection dirty flag consumed by the tick driver.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::info;

use shared::{SPEED_WORLD, TILE_WORLD};

use crate::map::MapData;
use crate::pathfind::{self, Tile};

/// A player entity. Owned exclusively by the world; mutated only under the
/// world's write lock.
#[derive(Debug, Clone)]
struct Player {
    id: String,
    x: i64,
    y: i64,
    target_x: i64,
    target_y: i64,
    has_target: bool,
    path: Vec<Tile>,
    path_index: usize,
}

impl Player {
    fn new(id: &str, x: i64, y: i64) -> Self {
        Player {
            id: id.to_string(),
            x,
            y,
            target_x: 0,
            target_y: 0,
            has_target: false,
            path: Vec::new(),
            path_index: 0,
        }
    }

    fn clear_path(&mut self) {
        self.has_target = false;
        self.path = Vec::new();
        self.path_index = 0;
    }
}

/// Positional snapshot of one player, detached from the world lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerView {
    pub id: String,
    pub x: i64,
    pub y: i64,
}

#[derive(Default)]
struct WorldState {
    players: HashMap<String, Player>,
    dirty: bool,
}

/// The shared world. Reads take the read lock, every mutation takes the write
/// lock; no lock is ever held across an await point.
pub struct World {
    map: MapData,
    state: RwLock<WorldState>,
}

impl World {
    pub fn new(map: MapData) -> Self {
        World {
            map,
            state: RwLock::new(WorldState::default()),
        }
    }

    pub fn map(&self) -> &MapData {
        &self.map
    }

    fn read(&self) -> RwLockReadGuard<'_, WorldState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, WorldState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Inserts a fresh idle player at the map-center tile. Idempotent: a
    /// present player is left untouched and the world stays clean.
    pub fn add_player(&self, id: &str) {
        let mut state = self.write();
        if state.players.contains_key(id) {
            return;
        }

        let (x, y) = tile_center((self.map.width / 2, self.map.height / 2));
        state.players.insert(id.to_string(), Player::new(id, x, y));
        state.dirty = true;
        info!("player {} spawned at ({}, {})", id, x, y);
    }

    pub fn remove_player(&self, id: &str) {
        let mut state = self.write();
        if state.players.remove(id).is_some() {
            state.dirty = true;
            info!("player {} removed", id);
        }
    }

    /// Teleports a player, discarding any path in progress.
    pub fn set_position(&self, id: &str, x: i64, y: i64) -> bool {
        let mut state = self.write();
        let Some(player) = state.players.get_mut(id) else {
            return false;
        };

        player.x = x;
        player.y = y;
        player.clear_path();
        state.dirty = true;
        true
    }

    /// Plans a walk toward the tile containing `(x, y)` world units.
    ///
    /// Returns false without touching state when the player is absent or the
    /// target tile is out of bounds or blocked. A degenerate plan (already on
    /// the target tile, or no route) leaves the player idle and still counts
    /// as accepted.
    pub fn set_target(&self, id: &str, x: i64, y: i64) -> bool {
        let goal = (x.div_euclid(TILE_WORLD), y.div_euclid(TILE_WORLD));
        if !self.map.walkable(goal.0, goal.1) {
            return false;
        }

        let mut state = self.write();
        let Some(player) = state.players.get_mut(id) else {
            return false;
        };

        let start = (player.x.div_euclid(TILE_WORLD), player.y.div_euclid(TILE_WORLD));
        let path = pathfind::find_path(&self.map, start, goal);

        if path.len() <= 1 {
            player.clear_path();
            state.dirty = true;
            return true;
        }

        // Index 0 is the tile the player is standing on; the first waypoint
        // consumed is index 1.
        let (tx, ty) = tile_center(path[1]);
        player.path = path;
        player.path_index = 1;
        player.target_x = tx;
        player.target_y = ty;
        player.has_target = true;
        state.dirty = true;
        true
    }

    /// Advances every walking player by up to `SPEED_WORLD * delta` world
    /// units. Reaching a waypoint snaps onto it and re-arms the next one in
    /// the same call. A non-positive delta is a no-op.
    pub fn step(&self, delta: f64) {
        if delta <= 0.0 {
            return;
        }

        let budget = SPEED_WORLD as f64 * delta;
        let mut state = self.write();
        let mut moved = false;

        for player in state.players.values_mut() {
            if !player.has_target {
                continue;
            }

            let dx = player.target_x - player.x;
            let dy = player.target_y - player.y;
            let distance = ((dx * dx + dy * dy) as f64).sqrt();

            if distance <= budget {
                if dx != 0 || dy != 0 {
                    player.x = player.target_x;
                    player.y = player.target_y;
                    moved = true;
                }

                player.path_index += 1;
                if player.path_index < player.path.len() {
                    let (tx, ty) = tile_center(player.path[player.path_index]);
                    player.target_x = tx;
                    player.target_y = ty;
                } else {
                    player.clear_path();
                }
            } else {
                let ratio = budget / distance;
                let step_x = (dx as f64 * ratio).round() as i64;
                let step_y = (dy as f64 * ratio).round() as i64;
                if step_x != 0 || step_y != 0 {
                    player.x += step_x;
                    player.y += step_y;
                    moved = true;
                }
            }
        }

        if moved {
            state.dirty = true;
        }
    }

    /// Returns the dirty flag and clears it.
    pub fn drain_dirty(&self) -> bool {
        let mut state = self.write();
        std::mem::replace(&mut state.dirty, false)
    }

    /// Players whose chunk lies within `chunk_radius` Chebyshev distance of
    /// the requester's chunk, the requester included. `None` when the
    /// requester is absent. Order is unspecified.
    pub fn snapshot_interest(
        &self,
        id: &str,
        chunk_radius: i64,
        chunk_size: i64,
    ) -> Option<Vec<PlayerView>> {
        let state = self.read();
        let origin = state.players.get(id)?;
        let (ocx, ocy) = chunk_of(origin.x, origin.y, chunk_size);

        let players = state
            .players
            .values()
            .filter(|player| {
                let (cx, cy) = chunk_of(player.x, player.y, chunk_size);
                (cx - ocx).abs() <= chunk_radius && (cy - ocy).abs() <= chunk_radius
            })
            .map(view_of)
            .collect();

        Some(players)
    }

    /// Every player in the world, regardless of interest.
    pub fn snapshot_players(&self) -> Vec<PlayerView> {
        self.read().players.values().map(view_of).collect()
    }
}

fn view_of(player: &Player) -> PlayerView {
    PlayerView {
        id: player.id.clone(),
        x: player.x,
        y: player.y,
    }
}

/// World-unit center of a tile.
fn tile_center((x, y): Tile) -> (i64, i64) {
    (x * TILE_WORLD + TILE_WORLD / 2, y * TILE_WORLD + TILE_WORLD / 2)
}

fn chunk_of(x: i64, y: i64, chunk_size: i64) -> (i64, i64) {
    let tile_x = x.div_euclid(TILE_WORLD);
    let tile_y = y.div_euclid(TILE_WORLD);
    (tile_x.div_euclid(chunk_size), tile_y.div_euclid(chunk_size))
}
