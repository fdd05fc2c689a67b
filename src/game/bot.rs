//! Server-driven bots. A bot only produces intents; they go through the same
//! intake as client commands.

use rand::Rng;
use std::f32::consts::PI;
use std::sync::atomic::{AtomicU64, Ordering};

use super::entities::{EntityStore, PlayerId, BOT_ID_BASE};
use super::map::MapLayout;
use super::physics::point_hits_wall;
use super::r#match::Command;

/// Movement speed (world units per second)
pub const BOT_SPEED: f32 = 180.0;
/// Bots only fire at players closer than this
pub const BOT_FIRE_RANGE: f32 = 300.0;
/// Bots stop closing in at this distance
const BOT_STANDOFF: f32 = 120.0;
/// Minimum gap between trigger pulls, on top of the weapon cooldown
const BOT_TRIGGER_INTERVAL: f32 = 1.0;
/// Bots only fire when facing within this angle of the target
const BOT_AIM_TOLERANCE: f32 = 0.35;
const BOT_AIM_JITTER: f32 = 0.08;
/// Seconds a dead bot waits before respawning
pub const BOT_RESPAWN_DELAY: f32 = 3.0;
/// A wander target is abandoned after this long
const WANDER_TIMEOUT: f32 = 4.0;
const WANDER_ARRIVED: f32 = 40.0;

static NEXT_BOT_ID: AtomicU64 = AtomicU64::new(BOT_ID_BASE + 1);

/// Allocate a bot id, unique across every match in the process
pub fn next_bot_id() -> PlayerId {
    NEXT_BOT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Per-bot decision state
#[derive(Debug, Clone, Default)]
pub struct BotBrain {
    wander_target: Option<(f32, f32)>,
    wander_since: f32,
    last_trigger_at: Option<f32>,
}

impl BotBrain {
    /// Decide this tick's intents for `bot_id`
    pub fn plan(
        &mut self,
        bot_id: PlayerId,
        store: &EntityStore,
        map: &MapLayout,
        now: f32,
        dt: f32,
        rng: &mut impl Rng,
    ) -> Vec<Command> {
        let Some(me) = store.players.get(&bot_id) else {
            return Vec::new();
        };
        if store.game_over {
            return Vec::new();
        }

        if !me.alive {
            let ready = me.died_at.map_or(true, |t| now - t >= BOT_RESPAWN_DELAY);
            return if ready {
                self.wander_target = None;
                vec![Command::Respawn { player_id: bot_id }]
            } else {
                Vec::new()
            };
        }

        let nearest = store
            .players
            .values()
            .filter(|p| p.alive && p.id != bot_id)
            .map(|p| (p, (p.x - me.x).hypot(p.y - me.y)))
            .min_by(|a, b| a.1.total_cmp(&b.1));

        let step = BOT_SPEED * dt;
        let mut intents = Vec::new();

        match nearest {
            Some((target, dist)) => {
                self.wander_target = None;
                let aim = (target.y - me.y).atan2(target.x - me.x);
                let (delta_x, delta_y) = if dist > BOT_STANDOFF {
                    (aim.cos() * step, aim.sin() * step)
                } else {
                    (0.0, 0.0)
                };
                intents.push(Command::Move {
                    player_id: bot_id,
                    delta_x,
                    delta_y,
                    rotation: aim,
                });

                let trigger_ready = self
                    .last_trigger_at
                    .map_or(true, |t| now - t >= BOT_TRIGGER_INTERVAL);
                if trigger_ready
                    && dist <= BOT_FIRE_RANGE
                    && angle_between(me.rotation, aim) <= BOT_AIM_TOLERANCE
                {
                    self.last_trigger_at = Some(now);
                    intents.push(Command::Shoot {
                        player_id: bot_id,
                        direction: aim + rng.gen_range(-BOT_AIM_JITTER..=BOT_AIM_JITTER),
                    });
                }
            }
            None => {
                let stale = now - self.wander_since >= WANDER_TIMEOUT;
                let (tx, ty) = match self.wander_target {
                    Some((tx, ty)) if !stale && (tx - me.x).hypot(ty - me.y) > WANDER_ARRIVED => {
                        (tx, ty)
                    }
                    _ => {
                        let next = pick_wander_target(map, rng);
                        self.wander_target = Some(next);
                        self.wander_since = now;
                        next
                    }
                };
                let heading = (ty - me.y).atan2(tx - me.x);
                intents.push(Command::Move {
                    player_id: bot_id,
                    delta_x: heading.cos() * step,
                    delta_y: heading.sin() * step,
                    rotation: heading,
                });
            }
        }

        intents
    }
}

/// Random open point on the map; gives up on avoiding walls after a few tries
fn pick_wander_target(map: &MapLayout, rng: &mut impl Rng) -> (f32, f32) {
    let mut point = (map.bounds.width / 2.0, map.bounds.height / 2.0);
    for _ in 0..8 {
        point = (
            rng.gen_range(0.0..map.bounds.width),
            rng.gen_range(0.0..map.bounds.height),
        );
        if !point_hits_wall(point.0, point.1, &map.walls) {
            break;
        }
    }
    point
}

/// Absolute angular difference in `[0, PI]`
fn angle_between(a: f32, b: f32) -> f32 {
    let diff = (a - b).rem_euclid(2.0 * PI);
    diff.min(2.0 * PI - diff)
}
