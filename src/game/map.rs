//! Map geometry: static walls, world bounds and spawn points

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// World size shared by every map. Clients scale this to their canvas.
pub const WORLD_WIDTH: f32 = 1600.0;
pub const WORLD_HEIGHT: f32 = 1200.0;

/// Static axis-aligned obstacle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Wall {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Wall {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x && x <= self.right() && y >= self.y && y <= self.bottom()
    }
}

/// Playable rectangle starting at the origin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldBounds {
    pub width: f32,
    pub height: f32,
}

impl WorldBounds {
    pub fn contains(&self, x: f32, y: f32) -> bool {
        (0.0..=self.width).contains(&x) && (0.0..=self.height).contains(&y)
    }
}

impl Default for WorldBounds {
    fn default() -> Self {
        Self {
            width: WORLD_WIDTH,
            height: WORLD_HEIGHT,
        }
    }
}

/// Immutable per-map data, shared read-only by a match for its whole lifetime
#[derive(Debug, Clone)]
pub struct MapLayout {
    pub id: String,
    pub bounds: WorldBounds,
    pub walls: Vec<Wall>,
    pub spawn_points: Vec<(f32, f32)>,
}

/// Look up a map by id. The returned layout is shared, never copied per match.
pub fn load_map(map_id: &str) -> Option<Arc<MapLayout>> {
    catalog().get(map_id).cloned()
}

/// Ids of every known map, sorted
pub fn map_ids() -> Vec<String> {
    let mut ids: Vec<String> = catalog().keys().cloned().collect();
    ids.sort();
    ids
}

fn catalog() -> &'static HashMap<String, Arc<MapLayout>> {
    static CATALOG: OnceLock<HashMap<String, Arc<MapLayout>>> = OnceLock::new();
    CATALOG.get_or_init(|| {
        [arena_map(), warehouse_map()]
            .into_iter()
            .map(|m| (m.id.clone(), Arc::new(m)))
            .collect()
    })
}

/// Corner Ls, edge bars, a central block and four inner Ls opening toward the middle
fn arena_map() -> MapLayout {
    let walls = vec![
        // Corner Ls
        Wall::new(0.0, 0.0, 40.0, 200.0),
        Wall::new(0.0, 0.0, 200.0, 40.0),
        Wall::new(1560.0, 0.0, 40.0, 200.0),
        Wall::new(1400.0, 0.0, 200.0, 40.0),
        Wall::new(0.0, 1000.0, 40.0, 200.0),
        Wall::new(0.0, 1160.0, 200.0, 40.0),
        Wall::new(1560.0, 1000.0, 40.0, 200.0),
        Wall::new(1400.0, 1160.0, 200.0, 40.0),
        // Edge bars
        Wall::new(700.0, 0.0, 200.0, 40.0),
        Wall::new(700.0, 1160.0, 200.0, 40.0),
        Wall::new(0.0, 500.0, 40.0, 200.0),
        Wall::new(1560.0, 500.0, 40.0, 200.0),
        // Central block
        Wall::new(700.0, 500.0, 200.0, 200.0),
        // Inner Ls
        Wall::new(300.0, 250.0, 30.0, 200.0),
        Wall::new(300.0, 250.0, 200.0, 30.0),
        Wall::new(300.0, 720.0, 30.0, 200.0),
        Wall::new(300.0, 890.0, 200.0, 30.0),
        Wall::new(1270.0, 250.0, 30.0, 200.0),
        Wall::new(1100.0, 250.0, 200.0, 30.0),
        Wall::new(1270.0, 720.0, 30.0, 200.0),
        Wall::new(1100.0, 890.0, 200.0, 30.0),
    ];

    MapLayout {
        id: "Map1".to_string(),
        bounds: WorldBounds::default(),
        walls,
        spawn_points: vec![
            (150.0, 150.0),
            (1450.0, 150.0),
            (150.0, 1050.0),
            (1450.0, 1050.0),
            (800.0, 150.0),
            (800.0, 1050.0),
            (150.0, 600.0),
            (1450.0, 600.0),
            (550.0, 600.0),
            (1050.0, 600.0),
        ],
    }
}

/// Rows of crates with lanes between them
fn warehouse_map() -> MapLayout {
    let mut walls = Vec::new();
    for row in 0..3 {
        let y = 250.0 + row as f32 * 300.0;
        for col in 0..4 {
            let x = 200.0 + col as f32 * 340.0;
            walls.push(Wall::new(x, y, 180.0, 60.0));
        }
    }
    walls.push(Wall::new(780.0, 0.0, 40.0, 150.0));
    walls.push(Wall::new(780.0, 1050.0, 40.0, 150.0));

    MapLayout {
        id: "Map2".to_string(),
        bounds: WorldBounds::default(),
        walls,
        spawn_points: vec![
            (100.0, 100.0),
            (1500.0, 100.0),
            (100.0, 1100.0),
            (1500.0, 1100.0),
            (100.0, 600.0),
            (1500.0, 600.0),
            (800.0, 430.0),
            (800.0, 730.0),
        ],
    }
}
