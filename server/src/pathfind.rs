//! Grid pathfinding: 4-connected A* over the tile map.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::map::MapData;

/// Tile coordinate, `(x, y)`.
pub type Tile = (i64, i64);

/// Finds a shortest path of tile waypoints from `start` to `goal`, both
/// inclusive. Returns an empty vector when either endpoint is unwalkable or
/// no path exists. Steps are N/S/E/W with uniform cost, so the Manhattan
/// heuristic is admissible and the first pop of the goal is optimal.
pub fn find_path(map: &MapData, start: Tile, goal: Tile) -> Vec<Tile> {
    if !map.walkable(goal.0, goal.1) || !map.walkable(start.0, start.1) {
        return Vec::new();
    }
    if start == goal {
        return vec![start];
    }

    // Min-heap on f = g + h. Entries are never updated in place; superseded
    // ones are recognized by their stale g on pop.
    let mut open: BinaryHeap<Reverse<(i64, i64, Tile)>> = BinaryHeap::new();
    let mut best_g: HashMap<Tile, i64> = HashMap::new();
    let mut parent: HashMap<Tile, Tile> = HashMap::new();

    best_g.insert(start, 0);
    open.push(Reverse((manhattan(start, goal), 0, start)));

    while let Some(Reverse((_, g, tile))) = open.pop() {
        if tile == goal {
            return reconstruct(&parent, start, goal);
        }

        if best_g.get(&tile).map_or(true, |&recorded| g > recorded) {
            continue;
        }

        for next in neighbors(tile) {
            if !map.walkable(next.0, next.1) {
                continue;
            }

            let tentative = g + 1;
            if best_g.get(&next).map_or(false, |&recorded| recorded <= tentative) {
                continue;
            }

            best_g.insert(next, tentative);
            parent.insert(next, tile);
            open.push(Reverse((tentative + manhattan(next, goal), tentative, next)));
        }
    }

    Vec::new()
}

fn manhattan(a: Tile, b: Tile) -> i64 {
    (a.0 - b.0).abs() + (a.1 - b.1).abs()
}

fn neighbors((x, y): Tile) -> [Tile; 4] {
    [(x + 1, y), (x - 1, y), (x, y + 1), (x, y - 1)]
}

fn reconstruct(parent: &HashMap<Tile, Tile>, start: Tile, goal: Tile) -> Vec<Tile> {
    let mut path = vec![goal];
    let mut current = goal;

    while current != start {
        match parent.get(&current) {
            Some(&prev) => {
                path.push(prev);
                current = prev;
            }
            None => return Vec::new(),
        }
    }

    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_map(size: i64) -> MapData {
        // All-walkable grid, no borders.
        MapData {
            width: size,
            height: size,
            tiles: vec![vec![0; size as usize]; size as usize],
        }
    }

    #[test]
    fn straight_line_path() {
        let map = open_map(10);
        let path = find_path(&map, (2, 2), (6, 2));
        assert_eq!(path.len(), 5);
        assert_eq!(path[0], (2, 2));
        assert_eq!(path[4], (6, 2));
    }

    #[test]
    fn path_length_matches_manhattan_distance() {
        // On an unobstructed map every shortest path has manhattan + 1 tiles.
        let map = open_map(12);
        for goal in [(7, 3), (0, 11), (11, 11), (2, 9)] {
            let path = find_path(&map, (4, 4), goal);
            let expected = manhattan((4, 4), goal) + 1;
            assert_eq!(path.len() as i64, expected, "goal {goal:?}");
        }
    }

    #[test]
    fn path_tiles_are_walkable_and_adjacent() {
        let map = MapData::default_grid(20, 20);
        let path = find_path(&map, (2, 2), (17, 15));
        assert!(!path.is_empty());

        for window in path.windows(2) {
            assert_eq!(manhattan(window[0], window[1]), 1);
        }
        for &(x, y) in &path {
            assert!(map.walkable(x, y));
        }
    }

    #[test]
    fn routes_around_walls() {
        let mut map = open_map(7);
        // Vertical wall at x = 3 with a gap at y = 6.
        for y in 0..6 {
            map.tiles[y as usize][3] = crate::map::TILE_BLOCKED;
        }

        let path = find_path(&map, (1, 1), (5, 1));
        assert!(!path.is_empty());
        assert!(path.contains(&(3, 6)));
        assert!(path.iter().all(|&(x, y)| map.walkable(x, y)));
    }

    #[test]
    fn unreachable_goal_returns_empty() {
        let mut map = open_map(7);
        // Seal the goal inside a box.
        for (x, y) in [(4, 3), (6, 3), (5, 2), (5, 4)] {
            map.tiles[y as usize][x as usize] = crate::map::TILE_BLOCKED;
        }

        assert!(find_path(&map, (1, 1), (5, 3)).is_empty());
    }

    #[test]
    fn blocked_goal_returns_empty() {
        let map = MapData::default_grid(10, 10);
        assert!(find_path(&map, (5, 5), (0, 0)).is_empty());
    }

    #[test]
    fn start_equals_goal() {
        let map = open_map(5);
        assert_eq!(find_path(&map, (2, 2), (2, 2)), vec![(2, 2)]);
    }
}
