//! Entity store: authoritative players and projectiles for one match

use std::collections::BTreeMap;

use super::combat::{Projectile, WeaponKind, MAX_HEALTH};
use super::error::GameError;
use super::snapshot::{MatchSnapshot, PlayerView, ProjectileView};

/// Account-stable player identifier
pub type PlayerId = u64;

/// Bot ids are allocated from here upward, clear of account ids
pub const BOT_ID_BASE: PlayerId = 1_000_000_000;

/// Player state in a match (authoritative)
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub id: PlayerId,
    pub username: String,
    pub is_bot: bool,

    // Position and facing
    pub x: f32,
    pub y: f32,
    pub rotation: f32,

    // Combat
    pub health: f32,
    pub alive: bool,
    pub weapon: WeaponKind,
    /// Match clock of the last accepted shot
    pub last_shot_at: Option<f32>,
    /// Match clock at death, for timed bot respawns
    pub died_at: Option<f32>,

    /// Movement requested since the last tick, integrated at tick start
    pub pending_dx: f32,
    pub pending_dy: f32,

    // Stats
    pub kills: u32,
    pub deaths: u32,
}

impl PlayerState {
    pub fn new(id: PlayerId, username: String, spawn_x: f32, spawn_y: f32) -> Self {
        Self {
            id,
            is_bot: id >= BOT_ID_BASE,
            username,
            x: spawn_x,
            y: spawn_y,
            rotation: 0.0,
            health: MAX_HEALTH,
            alive: true,
            weapon: WeaponKind::default(),
            last_shot_at: None,
            died_at: None,
            pending_dx: 0.0,
            pending_dy: 0.0,
            kills: 0,
            deaths: 0,
        }
    }

    /// Set health, keeping it clamped and `alive` in step with it
    pub fn set_health(&mut self, health: f32) {
        self.health = health.clamp(0.0, MAX_HEALTH);
        self.alive = self.health > 0.0;
    }
}

/// Players and projectiles of one match. Only the match actor mutates it.
#[derive(Debug, Default)]
pub struct EntityStore {
    pub players: BTreeMap<PlayerId, PlayerState>,
    pub projectiles: BTreeMap<u64, Projectile>,
    next_projectile_id: u64,
    pub game_over: bool,
    pub winner_name: Option<String>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_player(
        &mut self,
        id: PlayerId,
        username: String,
        spawn: (f32, f32),
    ) -> Result<&PlayerState, GameError> {
        if self.players.contains_key(&id) {
            return Err(GameError::DuplicatePlayer);
        }
        let player = PlayerState::new(id, username, spawn.0, spawn.1);
        Ok(self.players.entry(id).or_insert(player))
    }

    pub fn remove_player(&mut self, id: PlayerId) -> Option<PlayerState> {
        self.players.remove(&id)
    }

    pub fn player(&self, id: PlayerId) -> Result<&PlayerState, GameError> {
        self.players
            .get(&id)
            .ok_or_else(|| GameError::InvalidCommand(format!("unknown player {id}")))
    }

    pub fn player_mut(&mut self, id: PlayerId) -> Result<&mut PlayerState, GameError> {
        self.players
            .get_mut(&id)
            .ok_or_else(|| GameError::InvalidCommand(format!("unknown player {id}")))
    }

    /// Store a projectile under a fresh id and return that id
    pub fn add_projectile(&mut self, mut projectile: Projectile) -> u64 {
        self.next_projectile_id += 1;
        let id = self.next_projectile_id;
        projectile.id = id;
        self.projectiles.insert(id, projectile);
        id
    }

    pub fn remove_projectile(&mut self, id: u64) -> Option<Projectile> {
        self.projectiles.remove(&id)
    }

    pub fn alive_count(&self) -> usize {
        self.players.values().filter(|p| p.alive).count()
    }

    /// Point-in-time copy for publishing; later mutation does not affect it
    pub fn snapshot(&self, tick: u64) -> MatchSnapshot {
        MatchSnapshot {
            tick,
            players: self
                .players
                .iter()
                .map(|(id, p)| (*id, PlayerView::from(p)))
                .collect(),
            projectiles: self
                .projectiles
                .iter()
                .map(|(id, p)| (*id, ProjectileView::from(p)))
                .collect(),
            game_over: self.game_over,
            winner_name: self.winner_name.clone(),
        }
    }
}
