//! Combat system - weapons, projectiles, damage and hit detection

use serde::{Deserialize, Serialize};

use super::entities::PlayerId;
use super::map::{Wall, WorldBounds};
use super::physics::{segment_circle_contact, segment_wall_contact, PLAYER_RADIUS};

/// Maximum health for every player
pub const MAX_HEALTH: f32 = 100.0;

/// Projectiles older than this are discarded (seconds)
pub const PROJECTILE_LIFETIME: f32 = 2.0;

/// Weapon catalogue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WeaponKind {
    Pistol,
    Shotgun,
    #[serde(rename = "SMG")]
    Smg,
    Rifle,
    Knife,
}

impl Default for WeaponKind {
    fn default() -> Self {
        Self::Pistol
    }
}

/// Weapon stats
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeaponStats {
    /// Damage per hit
    pub damage: f32,
    /// Shots per second
    pub fire_rate: f32,
    /// Projectile speed (world units per second)
    pub projectile_speed: f32,
}

impl WeaponStats {
    pub fn for_kind(kind: WeaponKind) -> Self {
        match kind {
            WeaponKind::Pistol => Self {
                damage: 20.0,
                fire_rate: 2.0,
                projectile_speed: 1200.0,
            },
            WeaponKind::Shotgun => Self {
                damage: 50.0,
                fire_rate: 0.8,
                projectile_speed: 900.0,
            },
            WeaponKind::Smg => Self {
                damage: 15.0,
                fire_rate: 10.0,
                projectile_speed: 1400.0,
            },
            WeaponKind::Rifle => Self {
                damage: 35.0,
                fire_rate: 4.0,
                projectile_speed: 1800.0,
            },
            WeaponKind::Knife => Self {
                damage: 100.0,
                fire_rate: 0.5,
                projectile_speed: 600.0,
            },
        }
    }

    /// Seconds that must pass between accepted shots
    pub fn cooldown(&self) -> f32 {
        1.0 / self.fire_rate
    }
}

/// Active projectile in the game
#[derive(Debug, Clone)]
pub struct Projectile {
    pub id: u64,
    pub owner_id: PlayerId,
    pub x: f32,
    pub y: f32,
    /// Heading in radians, fixed at spawn
    pub direction: f32,
    pub speed: f32,
    pub damage: f32,
    /// Match clock (seconds) at spawn
    pub spawned_at: f32,
}

/// What ended a projectile's step
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    /// Still flying at the new position
    Flying,
    /// Struck this player
    HitPlayer(PlayerId),
    HitWall,
    OutOfBounds,
    Expired,
}

/// Minimal view of a hittable body
#[derive(Debug, Clone, Copy)]
pub struct Target {
    pub id: PlayerId,
    pub x: f32,
    pub y: f32,
}

impl Projectile {
    /// Advance by `speed * dt` along the fixed heading and resolve the first
    /// thing the swept segment touches. The closest contact wins, whether a wall
    /// or a living player other than the owner.
    pub fn step(
        &mut self,
        dt: f32,
        now: f32,
        targets: &[Target],
        walls: &[Wall],
        bounds: &WorldBounds,
    ) -> StepOutcome {
        let (x0, y0) = (self.x, self.y);
        let x1 = x0 + self.direction.cos() * self.speed * dt;
        let y1 = y0 + self.direction.sin() * self.speed * dt;

        let wall_t = segment_wall_contact(x0, y0, x1, y1, walls);
        let hit = targets
            .iter()
            .filter(|t| t.id != self.owner_id)
            .filter_map(|t| {
                segment_circle_contact(x0, y0, x1, y1, t.x, t.y, PLAYER_RADIUS).map(|at| (at, t.id))
            })
            .min_by(|a, b| a.0.total_cmp(&b.0));

        match (hit, wall_t) {
            (Some((player_t, id)), Some(wall_t)) if player_t <= wall_t => {
                return StepOutcome::HitPlayer(id)
            }
            (Some((_, id)), None) => return StepOutcome::HitPlayer(id),
            (_, Some(_)) => return StepOutcome::HitWall,
            (None, None) => {}
        }

        self.x = x1;
        self.y = y1;

        if !bounds.contains(x1, y1) {
            StepOutcome::OutOfBounds
        } else if now - self.spawned_at >= PROJECTILE_LIFETIME {
            StepOutcome::Expired
        } else {
            StepOutcome::Flying
        }
    }
}

/// Combat rules
pub struct CombatSystem;

impl CombatSystem {
    /// Whether the weapon has cooled down since the last accepted shot
    pub fn can_fire(last_shot_at: Option<f32>, now: f32, stats: &WeaponStats) -> bool {
        match last_shot_at {
            None => true,
            // Small tolerance so a 2 shots/s weapon fires every 30 ticks at 60 Hz
            Some(last) => now - last + 1e-4 >= stats.cooldown(),
        }
    }

    /// Apply damage to health, returns (new_health, is_dead). Health never
    /// leaves `[0, MAX_HEALTH]`.
    pub fn apply_damage(current_health: f32, damage: f32) -> (f32, bool) {
        let new_health = (current_health - damage.max(0.0)).clamp(0.0, MAX_HEALTH);
        (new_health, new_health <= 0.0)
    }
}

/// Hit result from projectile resolution
#[derive(Debug, Clone)]
pub struct HitResult {
    pub projectile_id: u64,
    pub shooter_id: PlayerId,
    pub target_id: PlayerId,
    pub damage: f32,
    pub target_killed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn projectile(x: f32, y: f32, direction: f32) -> Projectile {
        Projectile {
            id: 1,
            owner_id: 1,
            x,
            y,
            direction,
            speed: 600.0,
            damage: 20.0,
            spawned_at: 0.0,
        }
    }

    #[test]
    fn weapon_cooldown_is_inverse_fire_rate() {
        let pistol = WeaponStats::for_kind(WeaponKind::Pistol);
        assert!((pistol.cooldown() - 0.5).abs() < 1e-6);
        assert!(CombatSystem::can_fire(None, 0.0, &pistol));
        assert!(!CombatSystem::can_fire(Some(1.0), 1.2, &pistol));
        assert!(CombatSystem::can_fire(Some(1.0), 1.5, &pistol));
    }

    #[test]
    fn damage_is_clamped() {
        assert_eq!(CombatSystem::apply_damage(100.0, 30.0), (70.0, false));
        assert_eq!(CombatSystem::apply_damage(70.0, 80.0), (0.0, true));
        assert_eq!(CombatSystem::apply_damage(50.0, -10.0), (50.0, false));
    }

    #[test]
    fn projectile_flies_in_a_straight_line() {
        let mut p = projectile(100.0, 100.0, 0.0);
        let outcome = p.step(0.1, 0.1, &[], &[], &WorldBounds::default());
        assert_eq!(outcome, StepOutcome::Flying);
        assert!((p.x - 160.0).abs() < 1e-3);
        assert!((p.y - 100.0).abs() < 1e-3);
    }

    #[test]
    fn closest_target_wins_and_owner_is_ignored() {
        let mut p = projectile(100.0, 100.0, 0.0);
        let targets = [
            Target { id: 1, x: 110.0, y: 100.0 },
            Target { id: 3, x: 150.0, y: 100.0 },
            Target { id: 2, x: 130.0, y: 100.0 },
        ];
        let outcome = p.step(0.1, 0.1, &targets, &[], &WorldBounds::default());
        assert_eq!(outcome, StepOutcome::HitPlayer(2));
    }

    #[test]
    fn wall_in_front_of_target_absorbs_the_shot() {
        let mut p = projectile(100.0, 100.0, 0.0);
        let walls = [Wall::new(120.0, 50.0, 5.0, 100.0)];
        let targets = [Target { id: 2, x: 150.0, y: 100.0 }];
        let outcome = p.step(0.1, 0.1, &targets, &walls, &WorldBounds::default());
        assert_eq!(outcome, StepOutcome::HitWall);
    }

    #[test]
    fn projectile_leaving_world_or_aging_out_is_removed() {
        let mut p = projectile(1590.0, 100.0, 0.0);
        assert_eq!(
            p.step(0.1, 0.1, &[], &[], &WorldBounds::default()),
            StepOutcome::OutOfBounds
        );

        let mut p = projectile(100.0, 100.0, 0.0);
        assert_eq!(
            p.step(0.01, PROJECTILE_LIFETIME, &[], &[], &WorldBounds::default()),
            StepOutcome::Expired
        );
    }
}
