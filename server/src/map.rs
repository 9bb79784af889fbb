//! Tile map loading, validation, and the walkability oracle.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_MAP_WIDTH: i64 = 100;
pub const DEFAULT_MAP_HEIGHT: i64 = 100;

/// Tile value that blocks movement.
pub const TILE_BLOCKED: i64 = 2;

/// Non-blocking decoration placed on the default grid's stripes.
const TILE_DECORATION: i64 = 1;

#[derive(Debug, Error)]
pub enum MapError {
    #[error("failed to read map file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse map file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid map size")]
    InvalidSize,
    #[error("invalid map rows")]
    InvalidRows,
    #[error("invalid map columns")]
    InvalidColumns,
}

/// Immutable tile grid. `tiles` is row-major, `tiles[y][x]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapData {
    pub width: i64,
    pub height: i64,
    pub tiles: Vec<Vec<i64>>,
}

impl MapData {
    /// Loads and validates a map from the JSON schema
    /// `{"width": int, "height": int, "tiles": [[int, ...], ...]}`.
    pub fn load(path: impl AsRef<Path>) -> Result<MapData, MapError> {
        let file = File::open(path)?;
        let data: MapData = serde_json::from_reader(BufReader::new(file))?;
        data.validate()?;
        Ok(data)
    }

    /// Synthesizes the built-in grid: impassable borders, with a non-blocking
    /// decoration on the `(x + y) % 7 == 0` stripes.
    pub fn default_grid(width: i64, height: i64) -> MapData {
        let mut tiles = Vec::with_capacity(height as usize);

        for y in 0..height {
            let mut row = Vec::with_capacity(width as usize);
            for x in 0..width {
                let is_border = x == 0 || y == 0 || x == width - 1 || y == height - 1;
                let tile = if is_border {
                    TILE_BLOCKED
                } else if (x + y) % 7 == 0 {
                    TILE_DECORATION
                } else {
                    0
                };
                row.push(tile);
            }
            tiles.push(row);
        }

        MapData {
            width,
            height,
            tiles,
        }
    }

    fn validate(&self) -> Result<(), MapError> {
        if self.width <= 0 || self.height <= 0 {
            return Err(MapError::InvalidSize);
        }

        if self.tiles.len() != self.height as usize {
            return Err(MapError::InvalidRows);
        }

        for row in &self.tiles {
            if row.len() != self.width as usize {
                return Err(MapError::InvalidColumns);
            }
        }

        Ok(())
    }

    pub fn in_bounds(&self, x: i64, y: i64) -> bool {
        x >= 0 && x < self.width && y >= 0 && y < self.height
    }

    /// False for out-of-bounds coordinates and for blocked tiles.
    pub fn walkable(&self, x: i64, y: i64) -> bool {
        if !self.in_bounds(x, y) {
            return false;
        }
        self.tiles[y as usize][x as usize] != TILE_BLOCKED
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_grid_dimensions() {
        let map = MapData::default_grid(10, 8);
        assert_eq!(map.width, 10);
        assert_eq!(map.height, 8);
        assert_eq!(map.tiles.len(), 8);
        assert!(map.tiles.iter().all(|row| row.len() == 10));
    }

    #[test]
    fn default_grid_borders_blocked() {
        let map = MapData::default_grid(10, 10);
        for i in 0..10 {
            assert!(!map.walkable(i, 0));
            assert!(!map.walkable(i, 9));
            assert!(!map.walkable(0, i));
            assert!(!map.walkable(9, i));
        }
    }

    #[test]
    fn default_grid_stripes_walkable() {
        let map = MapData::default_grid(20, 20);
        // (3, 4) lies on a stripe; decoration does not block.
        assert_eq!(map.tiles[4][3], TILE_DECORATION);
        assert!(map.walkable(3, 4));
        assert_eq!(map.tiles[5][3], 0);
        assert!(map.walkable(3, 5));
    }

    #[test]
    fn out_of_bounds_not_walkable() {
        let map = MapData::default_grid(10, 10);
        assert!(!map.walkable(-1, 5));
        assert!(!map.walkable(5, -1));
        assert!(!map.walkable(10, 5));
        assert!(!map.walkable(5, 10));
    }

    #[test]
    fn validate_rejects_bad_shapes() {
        let mut map = MapData::default_grid(4, 4);
        map.tiles.pop();
        assert!(matches!(map.validate(), Err(MapError::InvalidRows)));

        let mut map = MapData::default_grid(4, 4);
        map.tiles[2].pop();
        assert!(matches!(map.validate(), Err(MapError::InvalidColumns)));

        let map = MapData {
            width: 0,
            height: 4,
            tiles: Vec::new(),
        };
        assert!(matches!(map.validate(), Err(MapError::InvalidSize)));
    }

    #[test]
    fn load_roundtrip_through_file() {
        let map = MapData::default_grid(6, 5);
        let mut path = std::env::temp_dir();
        path.push(format!("map_load_test_{}.json", std::process::id()));

        let mut file = File::create(&path).unwrap();
        file.write_all(serde_json::to_string(&map).unwrap().as_bytes())
            .unwrap();

        let loaded = MapData::load(&path).unwrap();
        assert_eq!(loaded.width, 6);
        assert_eq!(loaded.height, 5);
        assert!(!loaded.walkable(0, 0));
        assert!(loaded.walkable(2, 2));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn load_missing_file_errors() {
        assert!(matches!(
            MapData::load("/nonexistent/map.json"),
            Err(MapError::Io(_))
        ));
    }
}
