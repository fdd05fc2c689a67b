//! Snapshot wire types and publish cadence

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::combat::{Projectile, WeaponKind, WeaponStats};
use super::entities::{PlayerId, PlayerState};

/// Consistent copy of a match's entities, safe to serialize off the tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSnapshot {
    pub tick: u64,
    pub players: BTreeMap<PlayerId, PlayerView>,
    pub projectiles: BTreeMap<u64, ProjectileView>,
    pub game_over: bool,
    pub winner_name: Option<String>,
}

/// Player state as clients see it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    pub id: PlayerId,
    pub username: String,
    pub x: f32,
    pub y: f32,
    pub rotation: f32,
    pub health: f32,
    pub alive: bool,
    pub is_bot: bool,
    pub current_weapon: WeaponView,
    pub kills: u32,
    pub deaths: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeaponView {
    pub name: WeaponKind,
    pub damage: f32,
    pub fire_rate: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectileView {
    pub id: u64,
    pub player_id: PlayerId,
    pub x: f32,
    pub y: f32,
    pub direction: f32,
    pub speed: f32,
    pub damage: f32,
}

impl From<&PlayerState> for PlayerView {
    fn from(p: &PlayerState) -> Self {
        let stats = WeaponStats::for_kind(p.weapon);
        Self {
            id: p.id,
            username: p.username.clone(),
            x: p.x,
            y: p.y,
            rotation: p.rotation,
            health: p.health,
            alive: p.alive,
            is_bot: p.is_bot,
            current_weapon: WeaponView {
                name: p.weapon,
                damage: stats.damage,
                fire_rate: stats.fire_rate,
            },
            kills: p.kills,
            deaths: p.deaths,
        }
    }
}

impl From<&Projectile> for ProjectileView {
    fn from(p: &Projectile) -> Self {
        Self {
            id: p.id,
            player_id: p.owner_id,
            x: p.x,
            y: p.y,
            direction: p.direction,
            speed: p.speed,
            damage: p.damage,
        }
    }
}

/// Decides which ticks publish a snapshot
pub struct SnapshotBuilder {
    /// Tick counter since last snapshot
    ticks_since_snapshot: u32,
    /// Snapshot interval in ticks
    snapshot_interval: u32,
}

impl SnapshotBuilder {
    pub fn new(tick_rate: u32, snapshot_rate: u32) -> Self {
        let snapshot_interval = (tick_rate / snapshot_rate.max(1)).max(1);
        Self {
            ticks_since_snapshot: 0,
            snapshot_interval,
        }
    }

    /// Check if it's time to send a snapshot
    pub fn should_send(&mut self) -> bool {
        self.ticks_since_snapshot += 1;
        if self.ticks_since_snapshot >= self.snapshot_interval {
            self.ticks_since_snapshot = 0;
            true
        } else {
            false
        }
    }

    /// Force snapshot on next check (used for important events)
    pub fn force_next(&mut self) {
        self.ticks_since_snapshot = self.snapshot_interval;
    }
}
