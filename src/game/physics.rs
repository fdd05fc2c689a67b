//! Collision queries and movement integration against static map geometry

use super::map::{Wall, WorldBounds};

/// Player body radius (clients draw a 40 unit square)
pub const PLAYER_RADIUS: f32 = 20.0;

/// Clamp a point into the world rectangle
pub fn clamp_to_bounds(x: f32, y: f32, bounds: &WorldBounds) -> (f32, f32) {
    (x.clamp(0.0, bounds.width), y.clamp(0.0, bounds.height))
}

/// Point-in-wall test
pub fn point_hits_wall(x: f32, y: f32, walls: &[Wall]) -> bool {
    walls.iter().any(|w| w.contains(x, y))
}

/// Circle vs any wall (closest point on the rectangle within `radius`)
pub fn circle_hits_wall(x: f32, y: f32, radius: f32, walls: &[Wall]) -> bool {
    walls.iter().any(|w| {
        let nearest_x = x.clamp(w.x, w.right());
        let nearest_y = y.clamp(w.y, w.bottom());
        let dx = x - nearest_x;
        let dy = y - nearest_y;
        dx * dx + dy * dy < radius * radius
    })
}

/// Sweep a segment against the walls. Returns the smallest segment parameter
/// in `[0, 1]` at which it enters a wall, if any.
pub fn segment_wall_contact(x0: f32, y0: f32, x1: f32, y1: f32, walls: &[Wall]) -> Option<f32> {
    walls
        .iter()
        .filter_map(|w| segment_enters_rect(x0, y0, x1 - x0, y1 - y0, w))
        .min_by(|a, b| a.total_cmp(b))
}

/// Slab test (Liang-Barsky) for one rectangle
fn segment_enters_rect(x0: f32, y0: f32, dx: f32, dy: f32, w: &Wall) -> Option<f32> {
    let mut t_min = 0.0f32;
    let mut t_max = 1.0f32;

    for (origin, delta, lo, hi) in [(x0, dx, w.x, w.right()), (y0, dy, w.y, w.bottom())] {
        if delta.abs() < f32::EPSILON {
            if origin < lo || origin > hi {
                return None;
            }
            continue;
        }
        let inv = 1.0 / delta;
        let mut t1 = (lo - origin) * inv;
        let mut t2 = (hi - origin) * inv;
        if t1 > t2 {
            std::mem::swap(&mut t1, &mut t2);
        }
        t_min = t_min.max(t1);
        t_max = t_max.min(t2);
        if t_min > t_max {
            return None;
        }
    }

    Some(t_min)
}

/// Earliest segment parameter at which a moving point comes within `radius`
/// of a circle centre. `None` when the segment never gets that close.
pub fn segment_circle_contact(
    x0: f32,
    y0: f32,
    x1: f32,
    y1: f32,
    cx: f32,
    cy: f32,
    radius: f32,
) -> Option<f32> {
    let dx = x1 - x0;
    let dy = y1 - y0;
    let fx = x0 - cx;
    let fy = y0 - cy;

    let c = fx * fx + fy * fy - radius * radius;
    if c <= 0.0 {
        // Already inside at the start of the step
        return Some(0.0);
    }

    let a = dx * dx + dy * dy;
    if a < f32::EPSILON {
        return None;
    }
    let b = 2.0 * (fx * dx + fy * dy);
    let discriminant = b * b - 4.0 * a * c;
    if discriminant < 0.0 {
        return None;
    }

    let t = (-b - discriminant.sqrt()) / (2.0 * a);
    (0.0..=1.0).contains(&t).then_some(t)
}

/// Physics system for moving player bodies
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Integrate a displacement for a player body.
    ///
    /// The target is clamped to the world. A move is blocked when the body would
    /// overlap a wall at the target or its path crosses one; a blocked move
    /// slides along whichever single axis stays clear, else the body stays put.
    pub fn integrate_move(
        x: f32,
        y: f32,
        delta_x: f32,
        delta_y: f32,
        bounds: &WorldBounds,
        walls: &[Wall],
    ) -> (f32, f32) {
        let blocked = |px: f32, py: f32| {
            circle_hits_wall(px, py, PLAYER_RADIUS, walls)
                || segment_wall_contact(x, y, px, py, walls).is_some()
        };

        let (nx, ny) = clamp_to_bounds(x + delta_x, y + delta_y, bounds);
        if !blocked(nx, ny) {
            return (nx, ny);
        }

        let (sx, _) = clamp_to_bounds(x + delta_x, y, bounds);
        if delta_x != 0.0 && !blocked(sx, y) {
            return (sx, y);
        }

        let (_, sy) = clamp_to_bounds(x, y + delta_y, bounds);
        if delta_y != 0.0 && !blocked(x, sy) {
            return (x, sy);
        }

        (x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block() -> Vec<Wall> {
        vec![Wall::new(100.0, 100.0, 50.0, 50.0)]
    }

    #[test]
    fn clamps_into_world() {
        let bounds = WorldBounds::default();
        assert_eq!(clamp_to_bounds(-5.0, 1300.0, &bounds), (0.0, 1200.0));
        assert_eq!(clamp_to_bounds(10.0, 20.0, &bounds), (10.0, 20.0));
    }

    #[test]
    fn point_and_circle_queries() {
        let walls = block();
        assert!(point_hits_wall(120.0, 120.0, &walls));
        assert!(!point_hits_wall(90.0, 120.0, &walls));
        assert!(circle_hits_wall(85.0, 120.0, 20.0, &walls));
        assert!(!circle_hits_wall(70.0, 120.0, 20.0, &walls));
    }

    #[test]
    fn segment_sweep_reports_entry_point() {
        let walls = block();
        let t = segment_wall_contact(0.0, 125.0, 200.0, 125.0, &walls).unwrap();
        assert!((t - 0.5).abs() < 1e-4);
        assert!(segment_wall_contact(0.0, 50.0, 200.0, 50.0, &walls).is_none());
        // Vertical segment exercises the zero-delta axis
        assert!(segment_wall_contact(125.0, 0.0, 125.0, 200.0, &walls).is_some());
        // Stops short of the wall
        assert!(segment_wall_contact(0.0, 125.0, 90.0, 125.0, &walls).is_none());
    }

    #[test]
    fn segment_circle_contact_finds_first_touch() {
        let t = segment_circle_contact(0.0, 0.0, 100.0, 0.0, 60.0, 0.0, 10.0).unwrap();
        assert!((t - 0.5).abs() < 1e-4);
        assert!(segment_circle_contact(0.0, 0.0, 100.0, 0.0, 60.0, 30.0, 10.0).is_none());
        assert_eq!(segment_circle_contact(60.0, 0.0, 70.0, 0.0, 60.0, 0.0, 10.0), Some(0.0));
    }

    #[test]
    fn free_move_adds_delta() {
        let bounds = WorldBounds::default();
        let (x, y) = PhysicsSystem::integrate_move(400.0, 400.0, 5.0, -5.0, &bounds, &[]);
        assert_eq!((x, y), (405.0, 395.0));
    }

    #[test]
    fn move_is_clamped_at_world_edge() {
        let bounds = WorldBounds::default();
        let (x, y) = PhysicsSystem::integrate_move(1598.0, 2.0, 5.0, -5.0, &bounds, &[]);
        assert_eq!((x, y), (1600.0, 0.0));
    }

    #[test]
    fn long_move_lands_in_full() {
        let bounds = WorldBounds::default();
        let (x, y) = PhysicsSystem::integrate_move(400.0, 400.0, 300.0, -50.0, &bounds, &[]);
        assert_eq!((x, y), (700.0, 350.0));
    }

    #[test]
    fn long_move_cannot_pass_through_a_wall() {
        let bounds = WorldBounds::default();
        let walls = block();
        // Target (275, 125) is clear of the wall but the path crosses it
        let (x, y) = PhysicsSystem::integrate_move(75.0, 125.0, 200.0, 0.0, &bounds, &walls);
        assert_eq!((x, y), (75.0, 125.0));
    }

    #[test]
    fn blocked_move_slides_along_free_axis() {
        let bounds = WorldBounds::default();
        let walls = block();
        // Moving diagonally into the wall's left face: x is blocked, y is free
        let (x, y) = PhysicsSystem::integrate_move(75.0, 125.0, 10.0, 10.0, &bounds, &walls);
        assert_eq!((x, y), (75.0, 135.0));
    }

    #[test]
    fn fully_blocked_move_stays_put() {
        let bounds = WorldBounds::default();
        let walls = block();
        let (x, y) = PhysicsSystem::integrate_move(75.0, 125.0, 10.0, 0.0, &bounds, &walls);
        assert_eq!((x, y), (75.0, 125.0));
    }
}
